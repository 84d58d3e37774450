//! Timeout decorator for directories.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use replicant_common::{ClusterError, PrimaryName, PrimaryRecord, Result};

use crate::directory::{ClaimMode, NameDirectory};

/// Wraps a directory so no call blocks longer than `timeout`.
///
/// An elapsed call is reported as `DirectoryUnavailable`.
#[derive(Debug, Clone)]
pub struct TimedDirectory<D> {
    inner: D,
    timeout: Duration,
}

impl<D: NameDirectory> TimedDirectory<D> {
    /// Wrap `inner` with a per-call timeout.
    pub fn new(inner: D, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Get the wrapped directory.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    backend = self.inner.backend(),
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Directory call timed out"
                );
                Err(ClusterError::DirectoryUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl<D: NameDirectory> NameDirectory for TimedDirectory<D> {
    fn backend(&self) -> &str {
        self.inner.backend()
    }

    async fn lookup(&self, name: &PrimaryName) -> Result<PrimaryRecord> {
        self.bounded("lookup", self.inner.lookup(name)).await
    }

    async fn claim(
        &self,
        name: &PrimaryName,
        address: &str,
        mode: ClaimMode,
    ) -> Result<PrimaryRecord> {
        self.bounded("claim", self.inner.claim(name, address, mode))
            .await
    }

    async fn release(&self, name: &PrimaryName, address: &str) -> Result<bool> {
        self.bounded("release", self.inner.release(name, address))
            .await
    }
}
