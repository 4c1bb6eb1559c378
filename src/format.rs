//! Offline pretty-printing of JSON fixture files

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{FixtureError, Result};

/// Rewrite every `*.json` file under `root` with 2-space indentation.
///
/// Content starting with `{` (after trimming) is parsed as an object, anything
/// else as an array. The walk stops at the first failure; files already
/// rewritten stay rewritten. Returns the number of files rewritten.
///
/// # Errors
///
/// Returns [`FixtureError::FilesNotWritten`] if any file cannot be read,
/// parsed or written
pub fn format_json_files(root: &Path) -> Result<usize> {
    let mut count = 0;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| FixtureError::FilesNotWritten {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: Box::new(FixtureError::Io(e.into())),
        })?;

        let path = entry.path();
        if !entry.file_type().is_file() || !path.to_string_lossy().ends_with(".json") {
            continue;
        }

        format_file(path).map_err(|e| FixtureError::FilesNotWritten {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        debug!("Reformatted {}", path.display());
        count += 1;
    }

    info!("Reformatted {} JSON file(s) under {}", count, root.display());
    Ok(count)
}

fn format_file(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let formatted = format_json(&text)?;
    std::fs::write(path, formatted)?;
    Ok(())
}

/// Pretty-print a JSON object or array with 2-space indentation
///
/// # Errors
///
/// Returns error if the text is not an object (when it starts with `{`) or an array
pub fn format_json(text: &str) -> Result<String> {
    let formatted = if text.trim_start().starts_with('{') {
        let object: Map<String, Value> = serde_json::from_str(text)?;
        serde_json::to_string_pretty(&object)?
    } else {
        let array: Vec<Value> = serde_json::from_str(text)?;
        serde_json::to_string_pretty(&array)?
    };
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_object_and_array() {
        let temp_dir = TempDir::new().unwrap();
        let object_path = temp_dir.path().join("user.json");
        let array_path = temp_dir.path().join("nested/repos.json");
        std::fs::create_dir_all(array_path.parent().unwrap()).unwrap();

        let object = r#"  {"login":"octocat","id":1,"plan":{"name":"free"}}"#;
        let array = r#"[{"name":"a"},{"name":"b"}]"#;
        std::fs::write(&object_path, object).unwrap();
        std::fs::write(&array_path, array).unwrap();

        assert_eq!(format_json_files(temp_dir.path()).unwrap(), 2);

        let written = std::fs::read_to_string(&object_path).unwrap();
        assert!(written.starts_with("{\n  \"login\": \"octocat\""));
        assert!(written.contains("\n    \"name\": \"free\""));
        let reparsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(reparsed, serde_json::from_str::<Value>(object).unwrap());

        let written = std::fs::read_to_string(&array_path).unwrap();
        assert!(written.starts_with("[\n  {"));
        let reparsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(reparsed, serde_json::from_str::<Value>(array).unwrap());
    }

    #[test]
    fn test_non_json_files_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.txt");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(format_json_files(temp_dir.path()).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn test_invalid_json_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "{\"a\": ").unwrap();

        let err = format_json_files(temp_dir.path()).unwrap_err();
        match err {
            FixtureError::FilesNotWritten { path: failed, .. } => assert_eq!(failed, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scalar_is_rejected() {
        assert!(format_json("42").is_err());
        assert!(format_json("\"text\"").is_err());
    }
}
