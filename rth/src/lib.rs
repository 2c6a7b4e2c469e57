//! Remote Test Harness core.
//!
//! Orchestrates remote test execution on networked embedded devices:
//! bundles test code, pushes it through the cloud build service, restarts
//! the target, and reconstructs the test-execution narrative from the
//! polled device log stream.

pub mod api;
pub mod bundle;
pub mod logs;
pub mod narrator;
pub mod scheduler;
pub mod session;
pub mod watchdog;
