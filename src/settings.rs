use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dsl::vm::{Limits, MAX_CALL_DEPTH, MAX_STACK};
use crate::error::ScriptError;
use crate::paths;

// ── Compiler settings ────────────────────────────────────────────

/// Per-directory compiler and runtime settings, read from
/// `cdata-script.json` next to the scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CompilerSettings {
    /// File extension (without the dot) of script files.
    pub script_extension: String,
    /// Maximum operand stack depth of the VM.
    pub max_stack: usize,
    /// Maximum nesting of schema calls.
    pub max_call_depth: usize,
    /// Log a warning for native methods registered without a leading type hint.
    pub warn_unannotated_natives: bool,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            script_extension: paths::DEFAULT_SCRIPT_EXTENSION.to_string(),
            max_stack: MAX_STACK,
            max_call_depth: MAX_CALL_DEPTH,
            warn_unannotated_natives: true,
        }
    }
}

impl CompilerSettings {
    pub fn limits(&self) -> Limits {
        Limits {
            max_stack: self.max_stack,
            max_call_depth: self.max_call_depth,
        }
    }

    fn validate(&self) -> Result<(), ScriptError> {
        if self.script_extension.is_empty() || self.script_extension.contains('.') {
            return Err(ScriptError::InvalidArgument {
                message: format!("Invalid script extension `{}`", self.script_extension),
            });
        }
        if self.max_stack == 0 || self.max_call_depth == 0 {
            return Err(ScriptError::InvalidArgument {
                message: "max_stack and max_call_depth must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// JSON schema of the settings file.
pub fn settings_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(CompilerSettings)).unwrap_or_default()
}

/// Load settings from a script directory. Missing file means defaults;
/// missing fields take their default values.
pub fn load_settings(script_dir: &Path) -> Result<CompilerSettings, ScriptError> {
    let path = paths::settings_path(script_dir);
    if !path.exists() {
        log::debug!("no {} in {}; using defaults", paths::SETTINGS_FILE, script_dir.display());
        return Ok(CompilerSettings::default());
    }
    let settings: CompilerSettings = read_json(&path)?;
    settings.validate()?;
    log::debug!("loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to a script directory.
pub fn save_settings(script_dir: &Path, settings: &CompilerSettings) -> Result<(), ScriptError> {
    settings.validate()?;
    fs::create_dir_all(script_dir)?;
    write_json(&paths::settings_path(script_dir), settings)
}

/// Write default settings into `script_dir`. An existing file is kept unless
/// `force` is set. Returns the path written.
pub fn init_settings(script_dir: &Path, force: bool) -> Result<PathBuf, ScriptError> {
    let path = paths::settings_path(script_dir);
    if path.exists() && !force {
        return Err(ScriptError::InvalidArgument {
            message: format!("{} already exists (use --force to overwrite)", path.display()),
        });
    }
    save_settings(script_dir, &CompilerSettings::default())?;
    log::info!("wrote default settings to {}", path.display());
    Ok(path)
}

// ── File helpers ─────────────────────────────────────────────────

/// Per-file mutex map to serialize concurrent writes to the same path.
static FILE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Atomically write bytes to a file using write-to-temp-then-rename.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ScriptError> {
    let lock = FILE_LOCKS
        .lock()
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    let _guard = lock.lock();

    let mut tmp_name = OsString::from(path.file_name().unwrap_or_default());
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ScriptError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ScriptError> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CompilerSettings {
            script_extension: "script".to_string(),
            max_stack: 64,
            max_call_depth: 16,
            warn_unannotated_natives: false,
        };
        save_settings(dir.path(), &settings).unwrap();
        assert!(!dir.path().join("cdata-script.json.tmp").exists());

        let loaded = load_settings(dir.path()).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.limits().max_call_depth, 16);
    }

    #[test]
    fn test_load_missing_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings(dir.path()).unwrap();
        assert_eq!(loaded, CompilerSettings::default());
        assert_eq!(loaded.script_extension, "cds");
        assert_eq!(loaded.max_stack, 256);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(paths::settings_path(dir.path()), r#"{ "max_call_depth": 8 }"#).unwrap();
        let loaded = load_settings(dir.path()).unwrap();
        assert_eq!(loaded.max_call_depth, 8);
        assert_eq!(loaded.max_stack, MAX_STACK);
        assert!(loaded.warn_unannotated_natives);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(paths::settings_path(dir.path()), r#"{ "script_extension": ".cds" }"#).unwrap();
        assert!(matches!(
            load_settings(dir.path()).unwrap_err(),
            ScriptError::InvalidArgument { .. }
        ));
        fs::write(paths::settings_path(dir.path()), "{ not json").unwrap();
        assert!(matches!(
            load_settings(dir.path()).unwrap_err(),
            ScriptError::JsonError { .. }
        ));
    }

    #[test]
    fn test_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_settings(dir.path(), false).unwrap();
        assert_eq!(path, paths::settings_path(dir.path()));
        assert_eq!(load_settings(dir.path()).unwrap(), CompilerSettings::default());

        fs::write(&path, r#"{ "max_stack": 32 }"#).unwrap();
        assert!(matches!(
            init_settings(dir.path(), false).unwrap_err(),
            ScriptError::InvalidArgument { .. }
        ));
        assert_eq!(load_settings(dir.path()).unwrap().max_stack, 32);

        init_settings(dir.path(), true).unwrap();
        assert_eq!(load_settings(dir.path()).unwrap().max_stack, MAX_STACK);
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = settings_schema();
        let props = &schema["properties"];
        assert!(props["script_extension"].is_object());
        assert!(props["max_call_depth"].is_object());
    }
}
