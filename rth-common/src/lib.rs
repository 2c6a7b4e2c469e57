//! Shared types and utilities for Remote Test Harness.
//!
//! RTH runs embedded-device test suites by pushing code through a cloud
//! build service and reconstructing test progress from the device's polled
//! log stream. This crate carries the pieces shared between the CLI and
//! its tests: the domain types, the log-event model, the error taxonomy
//! with its stop-policy table, configuration, and test-file discovery.

pub mod config;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod types;

pub use config::{ApiConfig, ConfigError, HarnessConfig, CONFIG_FILE_NAME};
pub use errors::{StopFlags, TestError};
pub use events::{
    ImpUnitBody, ImpUnitCounters, ImpUnitMessage, ImpUnitType, LogEvent, LogRecord,
    IMPUNIT_MARKER,
};
pub use types::{
    DeviceDescriptor, DeviceId, ModelDescriptor, ModelId, Revision, TestFile, TestKind,
};
