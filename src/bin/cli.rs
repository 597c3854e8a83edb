// CLI binary: exiting on unrecoverable errors is standard for CLI tools.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::unreachable, clippy::indexing_slicing)]

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde_json::Value;

use cdata_script::dsl::compiler::CompiledUnit;
use cdata_script::dsl::schemas;
use cdata_script::dsl::types::Type;
use cdata_script::dsl::vm::{Program, Value as ScriptValue};
use cdata_script::error::ScriptError;
use cdata_script::loader;
use cdata_script::settings;

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "cdata-script", about = "Schema script compiler and runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script file or directory and list its schemas
    Check { path: PathBuf },
    /// Print the bytecode of every schema in a script file or directory
    Disasm { path: PathBuf },
    /// Run one schema. String and text arguments are taken verbatim, all
    /// others are parsed as JSON.
    Run {
        path: PathBuf,
        schema: String,
        args: Vec<String>,
    },
    /// List the builtin native methods with their signatures
    Natives,
    /// Print the JSON schema of the settings file
    SettingsSchema,
    /// Write a settings file with default values into a script directory
    InitSettings {
        dir: PathBuf,
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
}

// ── Loading ──────────────────────────────────────────────────────

/// A linked program and the number of files it came from.
struct Linked {
    program: Program,
    files: usize,
}

/// Load a directory, or a single file with the settings of its directory.
/// A single file registers its schemas in the process-wide registry.
fn load_path(path: &Path) -> Result<Linked, ScriptError> {
    if path.is_dir() {
        let settings = settings::load_settings(path)?;
        let loaded = loader::load_dir(path, &settings)?;
        return Ok(Linked {
            program: loaded.program,
            files: loaded.sources.len(),
        });
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let settings = settings::load_settings(dir)?;
    let source = loader::read_source(dir, path)?;
    let natives = loader::builtin_natives(&settings)?;
    let program = loader::link_sources(&[source], &natives, schemas::global(), &settings)?;
    Ok(Linked { program, files: 1 })
}

fn parse_arg(raw: &str, ty: &Type) -> Result<ScriptValue, ScriptError> {
    match ty {
        Type::String => Ok(ScriptValue::string(raw)),
        Type::Text => Ok(ScriptValue::text(raw)),
        _ => {
            let json: Value = serde_json::from_str(raw).map_err(|e| ScriptError::InvalidArgument {
                message: format!("Argument `{raw}` is not valid JSON for {ty}: {e}"),
            })?;
            Ok(ScriptValue::from_json(&json))
        }
    }
}

// ── Commands ─────────────────────────────────────────────────────

fn check(path: &Path, raw_json: bool) -> Result<(), ScriptError> {
    let loaded = load_path(path)?;
    if raw_json {
        let units: Vec<Value> = loaded
            .program
            .names()
            .filter_map(|name| loaded.program.get(name))
            .map(|unit| {
                serde_json::json!({
                    "name": unit.name,
                    "signature": unit.signature().to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(());
    }
    for name in loaded.program.names() {
        if let Some(unit) = loaded.program.get(name) {
            println!("{name} {}", unit.signature());
        }
    }
    println!(
        "ok: {} schema(s) in {} file(s)",
        loaded.program.len(),
        loaded.files
    );
    Ok(())
}

fn disasm(path: &Path, raw_json: bool) -> Result<(), ScriptError> {
    let loaded = load_path(path)?;
    let units: Vec<&CompiledUnit> = loaded
        .program
        .names()
        .filter_map(|name| loaded.program.get(name))
        .map(|unit| &**unit)
        .collect();
    if raw_json {
        println!("{}", serde_json::to_string_pretty(&units)?);
    } else {
        for unit in units {
            println!("{}", unit.disassemble());
        }
    }
    Ok(())
}

fn run(path: &Path, schema: &str, args: &[String], raw_json: bool) -> Result<(), ScriptError> {
    let loaded = load_path(path)?;
    let unit = loaded.program.get(schema).ok_or_else(|| ScriptError::NotFound {
        what: format!("Schema `{schema}`"),
    })?;
    if args.len() != unit.params.len() {
        return Err(ScriptError::InvalidArgument {
            message: format!(
                "`{}` {} expects {} argument(s), got {}",
                unit.name,
                unit.signature(),
                unit.params.len(),
                args.len()
            ),
        });
    }
    let values = args
        .iter()
        .zip(&unit.params)
        .map(|(raw, param)| parse_arg(raw, &param.ty))
        .collect::<Result<Vec<_>, _>>()?;

    let result = loaded.program.invoke(schema, values)?;
    if raw_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !unit.returns.is_void() {
        println!("{result}");
    }
    Ok(())
}

fn natives(raw_json: bool) -> Result<(), ScriptError> {
    let registry = loader::builtin_natives(&settings::CompilerSettings::default())?;
    let mut catalog = registry.catalog();
    catalog.sort_by_key(|info| info.category);
    if raw_json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }
    let mut category = "";
    for info in &catalog {
        if info.category != category {
            category = info.category;
            println!("\n{category}:");
        }
        println!(
            "  {}::{} {}  {}",
            info.owner,
            info.name,
            info.signature.as_deref().unwrap_or("(unannotated)"),
            info.description
        );
    }
    Ok(())
}

fn init_settings(dir: &Path, force: bool) -> Result<(), ScriptError> {
    let path = settings::init_settings(dir, force)?;
    println!("wrote {}", path.display());
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let raw = cli.json;

    let result = match &cli.command {
        Commands::Check { path } => check(path, raw),
        Commands::Disasm { path } => disasm(path, raw),
        Commands::Run { path, schema, args } => run(path, schema, args, raw),
        Commands::Natives => natives(raw),
        Commands::InitSettings { dir, force } => init_settings(dir, *force),
        Commands::SettingsSchema => {
            println!(
                "{}",
                serde_json::to_string_pretty(&settings::settings_schema()).unwrap_or_default()
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        if raw {
            let json = serde_json::to_string_pretty(&e).unwrap_or_default();
            eprintln!("{json}");
        } else {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}
