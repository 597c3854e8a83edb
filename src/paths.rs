//! Centralized path definitions for script directories.
//!
//! This module is the single source of truth for leaf filenames and
//! path-building functions. No other module should hard-code these strings.

use std::path::{Path, PathBuf};

// ── Leaf filenames ───────────────────────────────────────────────

pub const SETTINGS_FILE: &str = "cdata-script.json";
pub const DEFAULT_SCRIPT_EXTENSION: &str = "cds";

// ── Script-dir functions (take script_dir) ───────────────────────

pub fn settings_path(script_dir: &Path) -> PathBuf {
    script_dir.join(SETTINGS_FILE)
}

/// Whether `path` names a script file with the given extension.
pub fn is_script_file(path: &Path, extension: &str) -> bool {
    path.is_file() && path.extension().is_some_and(|e| e == extension)
}

/// Source identifier of a script: its path relative to the script directory,
/// with `/` separators.
pub fn source_id(script_dir: &Path, path: &Path) -> String {
    match path.strip_prefix(script_dir) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_are_relative() {
        let dir = Path::new("/scripts");
        assert_eq!(source_id(dir, &dir.join("mobs").join("zombie.cds")), "mobs/zombie.cds");
        assert_eq!(source_id(dir, Path::new("/elsewhere/a.cds")), "/elsewhere/a.cds");
    }

    #[test]
    fn settings_live_in_the_script_dir() {
        assert_eq!(
            settings_path(Path::new("/scripts")),
            PathBuf::from("/scripts/cdata-script.json")
        );
    }
}
