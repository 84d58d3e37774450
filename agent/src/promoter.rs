//! Local promotion out of recovery.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, instrument};

use replicant_common::{ClusterError, Result};

use crate::command;

/// Switches the local database out of replica mode.
///
/// Promotion is not safely repeatable; callers run it at most once per request.
#[async_trait]
pub trait LocalPromoter: Send + Sync {
    /// Promote the local database.
    async fn promote(&self) -> Result<()>;
}

/// Promotes with `pg_ctl promote`, run as the database owner through `sudo`.
#[derive(Debug, Clone)]
pub struct PgCtlPromoter {
    pg_user: String,
    pg_ctl: PathBuf,
    data_dir: PathBuf,
}

impl PgCtlPromoter {
    /// Create a promoter.
    pub fn new(
        pg_user: impl Into<String>,
        pg_ctl: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pg_user: pg_user.into(),
            pg_ctl: pg_ctl.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Arguments passed to `sudo`.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-u".to_string(),
            self.pg_user.clone(),
            self.pg_ctl.display().to_string(),
            "-D".to_string(),
            self.data_dir.display().to_string(),
            "promote".to_string(),
        ]
    }
}

#[async_trait]
impl LocalPromoter for PgCtlPromoter {
    #[instrument(skip(self))]
    async fn promote(&self) -> Result<()> {
        let args = self.args();
        info!(command = %format!("sudo {}", args.join(" ")), "Running promote command");
        command::run_checked("sudo", &args)
            .await
            .map_err(ClusterError::PromotionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_args() {
        let promoter = PgCtlPromoter::new(
            "postgres",
            "/usr/lib/postgresql/9.1/bin/pg_ctl",
            "/var/lib/postgresql/9.1/main",
        );
        assert_eq!(
            promoter.args().join(" "),
            "-u postgres /usr/lib/postgresql/9.1/bin/pg_ctl -D /var/lib/postgresql/9.1/main promote"
        );
    }
}
