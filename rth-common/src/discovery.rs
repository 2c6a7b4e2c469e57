//! Test file discovery.
//!
//! Walks the project directory for files matching the configured glob
//! patterns. A file whose name contains `.agent.test.` is an agent test;
//! everything else runs as a device test. Results are sorted by path so
//! run order is deterministic.

use crate::types::{TestFile, TestKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid test file pattern \"{pattern}\": {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

/// Discover test files under `root` matching `patterns`.
///
/// Patterns are interpreted relative to `root`. Duplicate matches across
/// patterns collapse to one entry.
pub fn discover_tests(root: &Path, patterns: &[String]) -> Result<Vec<TestFile>, DiscoveryError> {
    let mut found: BTreeMap<PathBuf, TestFile> = BTreeMap::new();

    for pattern in patterns {
        let full = root.join(pattern);
        let full = full.to_string_lossy();
        let paths = glob::glob(&full).map_err(|source| DiscoveryError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let kind = kind_from_name(&name);
            debug!(file = %name, %kind, "test file discovered");
            found.insert(path.clone(), TestFile { name, path, kind });
        }
    }

    Ok(found.into_values().collect())
}

/// Test kind from the file name: `*.agent.test.*` is an agent test,
/// everything else is a device test.
pub fn kind_from_name(name: &str) -> TestKind {
    if name.contains(".agent.test.") {
        TestKind::Agent
    } else {
        TestKind::Device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "// test\n").unwrap();
    }

    #[test]
    fn classifies_kind_from_file_name() {
        assert_eq!(kind_from_name("foo.agent.test.nut"), TestKind::Agent);
        assert_eq!(kind_from_name("foo.device.test.nut"), TestKind::Device);
        assert_eq!(kind_from_name("foo.test.nut"), TestKind::Device);
    }

    #[test]
    fn discovers_sorted_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.test.nut");
        touch(dir.path(), "a.agent.test.nut");
        touch(dir.path(), "readme.md");

        let patterns = vec!["*.test.nut".to_string(), "a.*.nut".to_string()];
        let tests = discover_tests(dir.path(), &patterns).unwrap();

        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].name, "a.agent.test.nut");
        assert_eq!(tests[0].kind, TestKind::Agent);
        assert_eq!(tests[1].name, "b.test.nut");
        assert_eq!(tests[1].kind, TestKind::Device);
    }

    #[test]
    fn discovers_in_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests/unit")).unwrap();
        touch(&dir.path().join("tests/unit"), "deep.test.nut");

        let patterns = vec!["tests/**/*.test.nut".to_string()];
        let tests = discover_tests(dir.path(), &patterns).unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].name, "deep.test.nut");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let patterns = vec!["[".to_string()];
        let err = discover_tests(dir.path(), &patterns).unwrap_err();
        assert!(err.to_string().contains("["));
    }
}
