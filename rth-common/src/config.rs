//! Harness configuration.
//!
//! Loaded from `.rth.toml` in the project directory, with environment
//! overrides for credentials (`RTH_API_KEY`, `RTH_API_BASE`). Interactive
//! setup prompts are out of scope; the file is read, validated, and used
//! as-is.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".rth.toml";

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Build-service credentials and endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key for the build service.
    #[serde(default)]
    pub key: String,
    /// Base URL of the build service.
    #[serde(default = "default_api_base")]
    pub base: String,
}

/// Full harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub api: ApiConfig,

    /// Model the devices under test are assigned to.
    pub model_id: String,

    /// Devices to run the test files against, in run order.
    pub devices: Vec<String>,

    /// Agent source deployed alongside device tests (and vice versa).
    #[serde(default)]
    pub agent_file: Option<PathBuf>,

    /// Device source deployed alongside agent tests.
    #[serde(default)]
    pub device_file: Option<PathBuf>,

    /// Glob patterns for test file discovery, relative to the project root.
    #[serde(default = "default_test_patterns")]
    pub test_files: Vec<String>,

    /// Per-test timeout in seconds (test-message watchdog base).
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Session-start watchdog timeout in seconds.
    #[serde(default = "default_session_start_timeout")]
    pub session_start_timeout: f64,

    /// Abort the whole run on the first failure.
    #[serde(default)]
    pub stop_on_failure: bool,
}

fn default_api_base() -> String {
    "https://build.electricimp.example/v5".to_string()
}

fn default_test_patterns() -> Vec<String> {
    vec!["*.test.nut".to_string(), "tests/**/*.test.nut".to_string()]
}

fn default_timeout() -> f64 {
    10.0
}

fn default_session_start_timeout() -> f64 {
    60.0
}

impl HarnessConfig {
    /// Load a config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `RTH_API_KEY` / `RTH_API_BASE` overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("RTH_API_KEY")
            && !key.is_empty()
        {
            debug!("api key taken from RTH_API_KEY");
            self.api.key = key;
        }
        if let Ok(base) = std::env::var("RTH_API_BASE")
            && !base.is_empty()
        {
            debug!(%base, "api base taken from RTH_API_BASE");
            self.api.base = base;
        }
    }

    /// Validate the loaded configuration, reporting the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.key.is_empty() {
            return Err(ConfigError::Validation(
                "api.key is empty (set it in the config or via RTH_API_KEY)".to_string(),
            ));
        }
        if self.model_id.is_empty() {
            return Err(ConfigError::Validation("model_id is empty".to_string()));
        }
        if self.devices.is_empty() {
            return Err(ConfigError::Validation(
                "devices list is empty".to_string(),
            ));
        }
        if self.timeout <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "timeout must be positive, got {}",
                self.timeout
            )));
        }
        if self.session_start_timeout <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "session_start_timeout must be positive, got {}",
                self.session_start_timeout
            )));
        }
        Ok(())
    }
}
