//! Single-shot liveness watchdog.
//!
//! The scheduler owns two of these per file run: one guarding session
//! start, one guarding test-message liveness. Each arm produces at most
//! one timeout signal, delivered as the watchdog's name on an mpsc
//! channel; `reset` (stop + start) is the liveness kick.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatchdogError {
    /// `start` was called while a timer is already pending. Callers must
    /// `stop` (or `reset`) first.
    #[error("Watchdog \"{0}\" is already armed")]
    AlreadyArmed(String),
}

/// A restartable single-shot timer.
///
/// At most one timer is pending per instance. On natural expiry the
/// watchdog sends its name on the channel exactly once and disarms
/// itself; `stop` disarms without firing and is idempotent. Safe to
/// `reset` from the handling of its own timeout signal.
pub struct Watchdog {
    name: String,
    timeout: Duration,
    tx: mpsc::UnboundedSender<String>,
    task: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new(
        name: impl Into<String>,
        timeout: Duration,
        tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            name: name.into(),
            timeout,
            tx,
            task: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a timer is currently pending.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Arm the timer. Fails if a timer is already pending.
    pub fn start(&mut self) -> Result<(), WatchdogError> {
        if self.is_armed() {
            return Err(WatchdogError::AlreadyArmed(self.name.clone()));
        }
        let name = self.name.clone();
        let timeout = self.timeout;
        let tx = self.tx.clone();
        debug!(watchdog = %self.name, ?timeout, "watchdog armed");
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(name);
        }));
        Ok(())
    }

    /// Disarm the timer. No-op when already disarmed.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(watchdog = %self.name, "watchdog stopped");
        }
    }

    /// Stop then start: the liveness kick.
    pub fn reset(&mut self) -> Result<(), WatchdogError> {
        self.stop();
        self.start()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::{sleep, timeout};

    fn watchdog(name: &str, millis: u64) -> (Watchdog, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Watchdog::new(name, Duration::from_millis(millis), tx), rx)
    }

    #[tokio::test]
    async fn fires_once_after_timeout() {
        let (mut wd, mut rx) = watchdog("start", 50);
        let armed_at = Instant::now();
        wd.start().unwrap();

        let name = rx.recv().await.unwrap();
        assert_eq!(name, "start");
        assert!(armed_at.elapsed() >= Duration::from_millis(50));

        // Exactly one signal per arm.
        let second = timeout(Duration::from_millis(120), rx.recv()).await;
        assert!(second.is_err(), "watchdog fired twice for one arm");
        assert!(!wd.is_armed());
    }

    #[tokio::test]
    async fn stop_before_expiry_suppresses_signal() {
        let (mut wd, mut rx) = watchdog("start", 60);
        wd.start().unwrap();
        sleep(Duration::from_millis(10)).await;
        wd.stop();

        let fired = timeout(Duration::from_millis(120), rx.recv()).await;
        assert!(fired.is_err(), "signal delivered after stop");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (mut wd, _rx) = watchdog("messages", 50);
        wd.stop();
        wd.start().unwrap();
        wd.stop();
        wd.stop();
        assert!(!wd.is_armed());
    }

    #[tokio::test]
    async fn double_start_is_an_invariant_violation() {
        let (mut wd, _rx) = watchdog("start", 500);
        wd.start().unwrap();
        assert_eq!(
            wd.start(),
            Err(WatchdogError::AlreadyArmed("start".to_string()))
        );
        wd.stop();
    }

    #[tokio::test]
    async fn reset_pushes_the_firing_time_out() {
        let (mut wd, mut rx) = watchdog("messages", 100);
        let armed_at = Instant::now();
        wd.start().unwrap();

        sleep(Duration::from_millis(50)).await;
        wd.reset().unwrap();

        let name = rx.recv().await.unwrap();
        assert_eq!(name, "messages");
        assert!(
            armed_at.elapsed() >= Duration::from_millis(150),
            "reset did not extend the window"
        );

        let second = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(second.is_err(), "watchdog fired twice across a reset");
    }

    #[tokio::test]
    async fn rearm_after_natural_expiry() {
        let (mut wd, mut rx) = watchdog("start", 30);
        wd.start().unwrap();
        rx.recv().await.unwrap();

        // The timeout handler keeping the session alive re-arms.
        wd.reset().unwrap();
        let name = rx.recv().await.unwrap();
        assert_eq!(name, "start");
    }
}
