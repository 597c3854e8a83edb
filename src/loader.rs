//! Loading script directories into a linked `Program`.
//!
//! Every file is parsed and every schema header registered before any body is
//! compiled, so schemas may call each other across files regardless of load
//! order.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dsl::ast::Script;
use crate::dsl::builtins::BUILTINS;
use crate::dsl::compiler::CompiledUnit;
use crate::dsl::natives::NativeRegistry;
use crate::dsl::schemas::{self, SchemaRegistry};
use crate::dsl::vm::Program;
use crate::dsl::{compile_script, compile_source, parse_source, register_headers};
use crate::error::ScriptError;
use crate::paths;
use crate::settings::CompilerSettings;

/// A script file read from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: String,
    pub path: PathBuf,
    pub text: String,
}

/// Result of loading a script directory.
pub struct Loaded {
    pub program: Program,
    pub natives: NativeRegistry,
    pub schemas: SchemaRegistry,
    pub sources: Vec<SourceFile>,
}

/// Native registry holding the builtin library, configured from `settings`.
pub fn builtin_natives(settings: &CompilerSettings) -> Result<NativeRegistry, ScriptError> {
    let mut natives = NativeRegistry::new().warn_unannotated(settings.warn_unannotated_natives);
    natives.register_all(BUILTINS)?;
    Ok(natives)
}

/// All script files under `dir`, sorted by path.
pub fn collect_scripts(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, ScriptError> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if paths::is_script_file(&path, extension) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Read a single script file into a `SourceFile`.
pub fn read_source(dir: &Path, path: &Path) -> Result<SourceFile, ScriptError> {
    Ok(SourceFile {
        id: paths::source_id(dir, path),
        path: path.to_path_buf(),
        text: fs::read_to_string(path)?,
    })
}

/// Load, compile and link every script in `dir`.
pub fn load_dir(dir: &Path, settings: &CompilerSettings) -> Result<Loaded, ScriptError> {
    if !dir.is_dir() {
        return Err(ScriptError::NotFound {
            what: format!("Script directory {}", dir.display()),
        });
    }
    let sources = collect_scripts(dir, &settings.script_extension)?
        .iter()
        .map(|path| read_source(dir, path))
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("found {} script file(s) in {}", sources.len(), dir.display());

    let natives = builtin_natives(settings)?;
    let schemas = SchemaRegistry::new();
    let program = link_sources(&sources, &natives, &schemas, settings)?;
    log::info!(
        "loaded {} schema(s) from {} file(s) in {}",
        program.len(),
        sources.len(),
        dir.display()
    );
    Ok(Loaded {
        program,
        natives,
        schemas,
        sources,
    })
}

/// Parse all sources, register all headers, then compile and link all bodies.
pub fn link_sources(
    sources: &[SourceFile],
    natives: &NativeRegistry,
    schemas: &SchemaRegistry,
    settings: &CompilerSettings,
) -> Result<Program, ScriptError> {
    let mut scripts: Vec<(&SourceFile, Script)> = Vec::with_capacity(sources.len());
    for source in sources {
        let script = parse_source(&source.id, &source.text)
            .map_err(|e| ScriptError::compile_in(e, &source.text))?;
        scripts.push((source, script));
    }

    for (source, script) in &scripts {
        let replaced = register_headers(script, schemas);
        if replaced > 0 {
            log::warn!("{}: {replaced} schema(s) replaced earlier definitions", source.id);
        }
    }

    let mut program = Program::new(settings.limits());
    for (source, script) in &scripts {
        let units = compile_script(&source.id, script, natives, schemas)
            .map_err(|e| ScriptError::compile_in(e, &source.text))?;
        for unit in units {
            log::debug!("{}: linked `{}` {}", source.id, unit.name, unit.signature());
            program.link(unit);
        }
    }
    Ok(program)
}

/// Compile a single source text against existing registries.
pub fn load_source(
    source_id: &str,
    text: &str,
    natives: &NativeRegistry,
    schemas: &SchemaRegistry,
) -> Result<Vec<CompiledUnit>, ScriptError> {
    compile_source(source_id, text, natives, schemas).map_err(|e| ScriptError::compile_in(e, text))
}

/// Compile a single source text against the process-wide schema registry,
/// so sources loaded one at a time can call each other.
pub fn load_global(
    source_id: &str,
    text: &str,
    natives: &NativeRegistry,
) -> Result<Vec<CompiledUnit>, ScriptError> {
    load_source(source_id, text, natives, schemas::global())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::vm::Value;

    fn write(dir: &Path, rel: &str, text: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn cross_file_calls_resolve_in_any_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a_main.cds",
            "schema main(n: number) -> number { util.double(n) + 1 }",
        );
        write(
            dir.path(),
            "util/z_double.cds",
            "schema util.double(x: number) -> number { x * 2 }",
        );
        write(dir.path(), "notes.txt", "not a script");

        let loaded = load_dir(dir.path(), &CompilerSettings::default()).unwrap();
        let ids: Vec<&str> = loaded.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a_main.cds", "util/z_double.cds"]);
        assert_eq!(loaded.program.len(), 2);
        assert!(loaded.schemas.contains("util_double"));
        assert_eq!(
            loaded.program.invoke("main", vec![Value::Number(20.0)]).unwrap(),
            Value::Number(41.0)
        );
    }

    #[test]
    fn custom_extension_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "one.script", "schema one() -> number { 1 }");
        write(dir.path(), "two.cds", "schema two() -> number { 2 }");
        let settings = CompilerSettings {
            script_extension: "script".to_string(),
            ..CompilerSettings::default()
        };
        let loaded = load_dir(dir.path(), &settings).unwrap();
        assert_eq!(loaded.program.names().collect::<Vec<_>>(), vec!["one"]);
    }

    #[test]
    fn compile_errors_name_file_and_position() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ok.cds", "schema ok() -> void { }");
        write(dir.path(), "broken.cds", "schema broken() -> number {\n  nope(1)\n}");
        let err = load_dir(dir.path(), &CompilerSettings::default()).err().unwrap();
        assert_eq!(
            err.to_string(),
            "[resolution] broken.cds:2:3: Unable to resolve `nope` for argument type number"
        );
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dir(&dir.path().join("absent"), &CompilerSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, ScriptError::NotFound { .. }));
    }

    #[test]
    fn load_source_uses_shared_registries() {
        let natives = builtin_natives(&CompilerSettings::default()).unwrap();
        let schemas = SchemaRegistry::new();
        load_source("lib", "schema square(x: number) -> number { x * x }", &natives, &schemas)
            .unwrap();
        let units = load_source("app", "schema app() -> number { square(3) }", &natives, &schemas)
            .unwrap();
        let mut program = Program::default();
        program.link(units.into_iter().next().unwrap());
        assert_eq!(
            program.invoke("app", vec![]).unwrap_err().to_string(),
            "no linked schema named `square`"
        );
    }

    #[test]
    fn global_registry_links_separate_loads() {
        let natives = builtin_natives(&CompilerSettings::default()).unwrap();
        let mut program = Program::default();
        for unit in load_global(
            "shared_lib.cds",
            "schema loader_test.triple(x: number) -> number { x * 3 }",
            &natives,
        )
        .unwrap()
        {
            program.link(unit);
        }
        for unit in load_global(
            "shared_app.cds",
            "schema loader_test.app() -> number { loader_test.triple(5) }",
            &natives,
        )
        .unwrap()
        {
            program.link(unit);
        }
        assert!(schemas::global().contains("loader_test_triple"));
        assert_eq!(
            program.invoke("loader_test.app", vec![]).unwrap(),
            Value::Number(15.0)
        );
    }

    #[test]
    fn depth_limit_comes_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "loop.cds", "schema spin(n: number) -> number { spin(n) }");
        let settings = CompilerSettings {
            max_call_depth: 3,
            ..CompilerSettings::default()
        };
        let loaded = load_dir(dir.path(), &settings).unwrap();
        let err = ScriptError::from(loaded.program.invoke("spin", vec![Value::Number(0.0)]).unwrap_err());
        assert!(matches!(err, ScriptError::Runtime { .. }));
    }
}
