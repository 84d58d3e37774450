//! Database process supervision.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use replicant_common::{whole_seconds, ClusterError, ProcessOutcome, Result};

use crate::command;

/// Starts the database process and reports whether it came up.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Ask the service manager to start the process.
    ///
    /// Fails with `StartError` when the start request is rejected outright.
    async fn start(&self) -> Result<()>;

    /// Wait up to `timeout` for the process to report running or dead.
    ///
    /// Fails with `PollTimeout` when neither happens in time.
    async fn poll(&self, timeout: Duration) -> Result<ProcessOutcome>;
}

/// Supervisor driving an LSB init script (`<script> start` / `<script> status`).
#[derive(Debug, Clone)]
pub struct InitScriptSupervisor {
    script: PathBuf,
    poll_interval: Duration,
}

impl InitScriptSupervisor {
    /// Create a supervisor for `/etc/init.d/<service>`.
    pub fn for_service(service: &str, poll_interval: Duration) -> Self {
        Self::new(PathBuf::from("/etc/init.d").join(service), poll_interval)
    }

    /// Create a supervisor for an explicit script path.
    pub fn new(script: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            script: script.into(),
            poll_interval,
        }
    }

    /// Path of the init script.
    pub fn script(&self) -> &PathBuf {
        &self.script
    }
}

/// Map an LSB `status` exit code to an outcome; `None` means keep waiting.
fn status_outcome(code: Option<i32>) -> Option<ProcessOutcome> {
    match code {
        Some(0) => Some(ProcessOutcome::Started),
        // 1: dead with pid file, 2: dead with lock file
        Some(1) | Some(2) => Some(ProcessOutcome::Failed),
        _ => None,
    }
}

#[async_trait]
impl ProcessSupervisor for InitScriptSupervisor {
    #[instrument(skip(self), fields(script = %self.script.display()))]
    async fn start(&self) -> Result<()> {
        info!("Starting database process");
        command::run_checked(&self.script, ["start"])
            .await
            .map_err(ClusterError::StartError)
    }

    #[instrument(skip(self), fields(script = %self.script.display()))]
    async fn poll(&self, timeout: Duration) -> Result<ProcessOutcome> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match command::exit_code(&self.script, ["status"]).await {
                Ok(code) => {
                    if let Some(outcome) = status_outcome(code) {
                        info!(outcome = ?outcome, "Process outcome observed");
                        return Ok(outcome);
                    }
                    debug!(code = ?code, "Process not running yet");
                }
                Err(e) => warn!(error = %e, "Status check failed"),
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(ClusterError::PollTimeout {
            timeout_secs: whole_seconds(timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_outcome() {
        assert_eq!(status_outcome(Some(0)), Some(ProcessOutcome::Started));
        assert_eq!(status_outcome(Some(1)), Some(ProcessOutcome::Failed));
        assert_eq!(status_outcome(Some(3)), None);
        assert_eq!(status_outcome(None), None);
    }

    #[test]
    fn test_for_service_path() {
        let supervisor = InitScriptSupervisor::for_service("postgresql", Duration::from_secs(1));
        assert_eq!(supervisor.script(), &PathBuf::from("/etc/init.d/postgresql"));
    }

    #[tokio::test]
    async fn test_start_and_poll_running() {
        let supervisor = InitScriptSupervisor::new("true", Duration::from_millis(10));

        supervisor.start().await.unwrap();
        let outcome = supervisor.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Started);
    }

    #[tokio::test]
    async fn test_start_failure() {
        let supervisor = InitScriptSupervisor::new("false", Duration::from_millis(10));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, ClusterError::StartError(msg) if msg.contains("exited with")));
    }

    #[tokio::test]
    async fn test_poll_dead_process() {
        let supervisor = InitScriptSupervisor::new("false", Duration::from_millis(10));

        let outcome = supervisor.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Failed);
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        // `env status` exits 127, which never counts as running or dead
        let supervisor = InitScriptSupervisor::new("env", Duration::from_millis(20));

        let err = supervisor.poll(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ClusterError::PollTimeout { timeout_secs: 1 }));
    }
}
