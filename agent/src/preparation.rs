//! Role-specific preparation strategies.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, instrument};

use replicant_common::{ClusterError, Result};

use crate::command;
use crate::recovery;

/// Puts the host into a state where the database can start in a given role.
#[async_trait]
pub trait PreparationStrategy: Send + Sync {
    /// Deployment flavor name used in logs.
    fn flavor(&self) -> &str;

    /// Prepare this node to start as the primary.
    async fn prepare_master(&self) -> Result<()>;

    /// Prepare this node to start as a replica.
    async fn prepare_replica(&self) -> Result<()>;
}

/// Runs one executable per role.
#[derive(Debug, Clone)]
pub struct ScriptPreparation {
    master_script: PathBuf,
    replica_script: PathBuf,
}

impl ScriptPreparation {
    /// Create a strategy from the two script paths.
    pub fn new(master_script: impl Into<PathBuf>, replica_script: impl Into<PathBuf>) -> Self {
        Self {
            master_script: master_script.into(),
            replica_script: replica_script.into(),
        }
    }
}

#[async_trait]
impl PreparationStrategy for ScriptPreparation {
    fn flavor(&self) -> &str {
        "script"
    }

    #[instrument(skip(self), fields(script = %self.master_script.display()))]
    async fn prepare_master(&self) -> Result<()> {
        command::run_checked(&self.master_script, std::iter::empty::<&str>())
            .await
            .map_err(ClusterError::PreparationError)
    }

    #[instrument(skip(self), fields(script = %self.replica_script.display()))]
    async fn prepare_replica(&self) -> Result<()> {
        command::run_checked(&self.replica_script, std::iter::empty::<&str>())
            .await
            .map_err(ClusterError::PreparationError)
    }
}

/// PostgreSQL preparation.
///
/// Replicas get a recovery settings file rendered from a template; a primary
/// has any previously rendered file removed so the server starts writable.
#[derive(Debug, Clone)]
pub struct PostgresPreparation {
    template_path: PathBuf,
    output_path: PathBuf,
    values: BTreeMap<String, String>,
}

impl PostgresPreparation {
    /// Create a strategy rendering `template_path` into `output_path` with `values`.
    pub fn new(
        template_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        values: BTreeMap<String, String>,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            output_path: output_path.into(),
            values,
        }
    }

    /// Render the template and write the recovery settings file.
    pub async fn write_recovery_conf(&self) -> Result<()> {
        let template = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|e| {
                ClusterError::PreparationError(format!(
                    "reading {}: {}",
                    self.template_path.display(),
                    e
                ))
            })?;

        let rendered = recovery::render(&template, &self.values)
            .map_err(|e| ClusterError::PreparationError(e.to_string()))?;

        tokio::fs::write(&self.output_path, rendered)
            .await
            .map_err(|e| {
                ClusterError::PreparationError(format!(
                    "writing {}: {}",
                    self.output_path.display(),
                    e
                ))
            })?;

        info!(output = %self.output_path.display(), "Recovery settings written");
        Ok(())
    }
}

#[async_trait]
impl PreparationStrategy for PostgresPreparation {
    fn flavor(&self) -> &str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn prepare_master(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.output_path).await {
            Ok(()) => {
                info!(output = %self.output_path.display(), "Removed stale recovery settings");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClusterError::PreparationError(format!(
                "removing {}: {}",
                self.output_path.display(),
                e
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn prepare_replica(&self) -> Result<()> {
        self.write_recovery_conf().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert("master_cname".to_string(), "master.test.example.com".to_string());
        values
    }

    #[tokio::test]
    async fn test_script_preparation() {
        let ok = ScriptPreparation::new("true", "true");
        ok.prepare_master().await.unwrap();
        ok.prepare_replica().await.unwrap();

        let failing = ScriptPreparation::new("true", "false");
        let err = failing.prepare_replica().await.unwrap_err();
        assert!(matches!(err, ClusterError::PreparationError(_)));
    }

    #[tokio::test]
    async fn test_postgres_replica_writes_recovery_conf() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("recovery.conf.tmpl");
        let output = dir.path().join("recovery.conf");
        std::fs::write(&template, "primary_conninfo = 'host={{master_cname}}'\n").unwrap();

        let preparation = PostgresPreparation::new(&template, &output, values());
        preparation.prepare_replica().await.unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        let settings = recovery::parse_recovery_conf(&written).unwrap();
        assert_eq!(settings["primary_conninfo"], "host=master.test.example.com");
    }

    #[tokio::test]
    async fn test_postgres_replica_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let preparation = PostgresPreparation::new(
            dir.path().join("missing.tmpl"),
            dir.path().join("recovery.conf"),
            values(),
        );

        let err = preparation.prepare_replica().await.unwrap_err();
        assert_eq!(err.error_code(), "PREPARATION_ERROR");
    }

    #[tokio::test]
    async fn test_postgres_replica_unknown_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("recovery.conf.tmpl");
        std::fs::write(&template, "user = '{{replication_user}}'\n").unwrap();

        let preparation =
            PostgresPreparation::new(&template, dir.path().join("recovery.conf"), values());
        let err = preparation.prepare_replica().await.unwrap_err();
        assert!(matches!(err, ClusterError::PreparationError(msg) if msg.contains("replication_user")));
    }

    #[tokio::test]
    async fn test_postgres_master_removes_stale_conf() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("recovery.conf");
        std::fs::write(&output, "standby_mode = 'on'\n").unwrap();

        let preparation =
            PostgresPreparation::new(dir.path().join("unused.tmpl"), &output, values());
        preparation.prepare_master().await.unwrap();
        assert!(!output.exists());

        // Nothing to remove the second time.
        preparation.prepare_master().await.unwrap();
    }
}
