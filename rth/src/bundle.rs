//! Source bundling collaborator.
//!
//! Assembles the device/agent payloads for a revision: the test framework,
//! the partner source (agent source for device tests and vice versa), and
//! the test file itself, with the session id bound into the test side so
//! the framework can tag its protocol lines. Templating and
//! line-numbering concerns stay inside this module.

use rth_common::{TestFile, TestKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimal embedded test framework, injected ahead of every test file.
/// Squirrel source; the framework tags its protocol lines with the
/// `__IMPUNIT__` marker and the bound session id.
const TEST_FRAMEWORK: &str = include_str!("framework.nut");

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The assembled payloads for one revision.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub device_code: String,
    pub agent_code: String,
}

/// Seam between the scheduler and source assembly.
pub trait SourceBundler {
    fn bundle(&self, test: &TestFile, session_id: &str) -> Result<Bundle, BundleError>;
}

/// Concatenating bundler for Squirrel sources.
pub struct NutBundler {
    agent_source: Option<PathBuf>,
    device_source: Option<PathBuf>,
}

impl NutBundler {
    pub fn new(agent_source: Option<PathBuf>, device_source: Option<PathBuf>) -> Self {
        Self {
            agent_source,
            device_source,
        }
    }

    fn read(path: &Path) -> Result<String, BundleError> {
        std::fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_optional(path: &Option<PathBuf>) -> Result<String, BundleError> {
        match path {
            Some(path) => Self::read(path),
            None => Ok(String::new()),
        }
    }

    /// The test-side payload: session binding, framework, then the test.
    fn test_side(test: &TestFile, session_id: &str) -> Result<String, BundleError> {
        let test_code = Self::read(&test.path)?;
        Ok(format!(
            "IMP_TEST_SESSION_ID <- \"{session_id}\";\n{TEST_FRAMEWORK}\n{test_code}"
        ))
    }
}

impl SourceBundler for NutBundler {
    fn bundle(&self, test: &TestFile, session_id: &str) -> Result<Bundle, BundleError> {
        let test_side = Self::test_side(test, session_id)?;
        match test.kind {
            TestKind::Agent => Ok(Bundle {
                agent_code: test_side,
                device_code: Self::read_optional(&self.device_source)?,
            }),
            TestKind::Device => Ok(Bundle {
                device_code: test_side,
                agent_code: Self::read_optional(&self.agent_source)?,
            }),
        }
    }
}
