//! Scenario file validation.

use std::path::Path;

use crate::scenario::{Scenario, ScenarioError};

/// Validate every `.ron` scenario in a directory.
///
/// Returns the number of scenarios checked.
///
/// # Errors
///
/// Returns the first scenario that fails to load or validate, or
/// [`ScenarioError::FileNotFound`] if `path` is not a directory.
pub fn validate_scenario_directory(path: &Path) -> Result<usize, ScenarioError> {
    if !path.is_dir() {
        return Err(ScenarioError::FileNotFound(path.display().to_string()));
    }

    let mut files: Vec<_> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "ron"))
        .collect();
    files.sort();

    for file in &files {
        let scenario = Scenario::load(file)?;
        tracing::debug!(file = %file.display(), name = %scenario.name, "Scenario ok");
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn test_counts_ron_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ron"), r#"(name: "a", advance_ms: 10)"#).unwrap();
        fs::write(dir.path().join("b.ron"), r#"(name: "b", advance_ms: 20)"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a scenario").unwrap();

        assert_eq!(validate_scenario_directory(dir.path()).unwrap(), 2);
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(validate_scenario_directory(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.ron"), r#"(name: "ok", advance_ms: 1)"#).unwrap();
        fs::write(
            dir.path().join("bad.ron"),
            r#"(name: "bad", entropy: [2.0], advance_ms: 1)"#,
        )
        .unwrap();

        let err = validate_scenario_directory(dir.path()).unwrap_err();
        assert!(matches!(err, ScenarioError::Invalid { .. }));
    }

    #[test]
    fn test_missing_directory() {
        let err = validate_scenario_directory(Path::new("no/such/dir")).unwrap_err();
        assert!(matches!(err, ScenarioError::FileNotFound(_)));
    }
}
