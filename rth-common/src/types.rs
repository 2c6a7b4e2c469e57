//! Common types used across RTH components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a device registered with the build service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a model (the code unit shared by a group of devices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the device/agent pair a test file exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Runs in the cloud-side agent VM; reads `agent.log` records.
    Agent,
    /// Runs on the device itself; reads `server.log` records.
    Device,
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// A discovered test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
    /// File name without directory components.
    pub name: String,
    /// Full path to the file.
    pub path: PathBuf,
    /// Agent or device test, derived from the file name.
    pub kind: TestKind,
}

/// Device descriptor returned by the build service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Model the device is currently assigned to.
    pub model_id: ModelId,
    /// Reported power state (e.g. "online", "offline").
    pub powerstate: String,
    /// Human-readable device name.
    pub name: String,
}

impl DeviceDescriptor {
    /// Whether the device is reachable for a restart-driven test run.
    pub fn is_online(&self) -> bool {
        self.powerstate == "online"
    }
}

/// Model descriptor returned by the build service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Human-readable model name.
    pub name: String,
}

/// A code revision created on the build service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    /// Monotonically increasing revision number.
    pub version: u64,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_display_roundtrip() {
        let id = DeviceId::new("23a0dd3901d0a3ce");
        assert_eq!(id.to_string(), "23a0dd3901d0a3ce");
        assert_eq!(id.as_str(), "23a0dd3901d0a3ce");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TestKind::Agent).unwrap(), "\"agent\"");
        assert_eq!(serde_json::to_string(&TestKind::Device).unwrap(), "\"device\"");
    }

    #[test]
    fn device_descriptor_online_check() {
        let dev = DeviceDescriptor {
            model_id: ModelId::new("m1"),
            powerstate: "online".to_string(),
            name: "bench-imp".to_string(),
        };
        assert!(dev.is_online());

        let off = DeviceDescriptor {
            powerstate: "offline".to_string(),
            ..dev
        };
        assert!(!off.is_online());
    }
}
