//! Building the coordinator and promotion guard from configuration.

use std::sync::Arc;

use tracing::{debug, info};

use replicant_agent::recovery::recovery_values;
use replicant_agent::{
    DatabaseHealthCheck, EnvMetadataSource, InitScriptSupervisor, JsonFileMetadataSource,
    LocalPromoter, MetadataSource, PgCtlPromoter, PgHealthCheck, PostgresPreparation,
    PreparationStrategy, ProcessSupervisor, ScriptPreparation,
};
use replicant_common::{ClusterError, ClusterIdentity, Result};
use replicant_directory::{NameDirectory, PgDirectory, TimedDirectory};

use crate::config::{ClusterConfig, Flavor, MetadataConfig};
use crate::coordinator::ClusterCoordinator;
use crate::metrics::SharedMetrics;
use crate::promotion::PromotionGuard;

/// Metadata source selected by the configuration.
pub fn metadata_source(config: &ClusterConfig) -> Arc<dyn MetadataSource> {
    match &config.metadata {
        MetadataConfig::Env { cluster } => Arc::new(EnvMetadataSource::new(cluster.clone())),
        MetadataConfig::JsonFile {
            user_data,
            instance,
        } => {
            let source = JsonFileMetadataSource::new(user_data);
            match instance {
                Some(instance) => Arc::new(source.with_instance(instance)),
                None => Arc::new(source),
            }
        }
    }
}

/// Read metadata and build the local node identity.
pub async fn load_identity(config: &ClusterConfig) -> Result<ClusterIdentity> {
    let source = metadata_source(config);
    let metadata = source.metadata().await?;
    let identity = ClusterIdentity::from_metadata(metadata, &config.address_key)?;

    info!(
        source = source.name(),
        cluster = %identity.cluster(),
        address = %identity.address(),
        instance_id = identity.instance_id().unwrap_or("-"),
        "Loaded cluster identity"
    );
    Ok(identity)
}

/// Connect to the directory database, creating its table if needed.
///
/// Every call on the returned directory is bounded by the directory timeout.
pub async fn connect_directory(config: &ClusterConfig) -> Result<Arc<dyn NameDirectory>> {
    let url = config.directory_url.as_deref().ok_or_else(|| {
        ClusterError::ConfigurationError("directory_url is not set".to_string())
    })?;

    let timeout = config.timing.directory_timeout;
    let directory = PgDirectory::connect_lazy(url, timeout)?;
    tokio::time::timeout(timeout, directory.ensure_schema())
        .await
        .map_err(|_| {
            ClusterError::DirectoryUnavailable(format!("schema setup timed out after {:?}", timeout))
        })??;

    debug!(timeout = ?timeout, "Directory ready");
    Ok(Arc::new(TimedDirectory::new(directory, timeout)))
}

/// Preparation strategy for the configured flavor.
pub fn preparation(
    config: &ClusterConfig,
    identity: &ClusterIdentity,
) -> Arc<dyn PreparationStrategy> {
    match config.flavor {
        Flavor::Script => Arc::new(ScriptPreparation::new(
            &config.script.master_script,
            &config.script.replica_script,
        )),
        Flavor::Postgres => {
            let primary_name = identity.primary_name(&config.naming_domain);
            let values = recovery_values(identity, &config.postgres.settings, &primary_name);
            Arc::new(PostgresPreparation::new(
                &config.postgres.recovery_template_path,
                &config.postgres.recovery_output_path,
                values,
            ))
        }
    }
}

/// Init-script supervisor for the configured service.
pub fn supervisor(config: &ClusterConfig) -> Arc<dyn ProcessSupervisor> {
    let service = match config.flavor {
        Flavor::Script => &config.script.service_name,
        Flavor::Postgres => &config.postgres.service_name,
    };
    Arc::new(InitScriptSupervisor::for_service(
        service,
        config.timing.poll_interval,
    ))
}

/// Health check used to check the incumbent and the local database.
pub fn health_check(config: &ClusterConfig) -> Result<Arc<dyn DatabaseHealthCheck>> {
    require_postgres(config)?;
    let pg = &config.postgres;
    let check = PgHealthCheck::new(
        pg.port,
        &pg.user,
        &pg.database,
        config.timing.health_check_timeout,
    );
    Ok(match &pg.password {
        Some(password) => Arc::new(check.with_password(password)),
        None => Arc::new(check),
    })
}

/// Promoter for the local database.
pub fn promoter(config: &ClusterConfig) -> Result<Arc<dyn LocalPromoter>> {
    require_postgres(config)?;
    let pg = &config.postgres;
    Ok(Arc::new(PgCtlPromoter::new(&pg.os_user, &pg.pg_ctl, &pg.data_dir)))
}

fn require_postgres(config: &ClusterConfig) -> Result<()> {
    if config.flavor != Flavor::Postgres {
        return Err(ClusterError::ConfigurationError(
            "promotion requires the postgres flavor".to_string(),
        ));
    }
    Ok(())
}

/// Coordinator wired to the configured collaborators.
pub fn coordinator(
    config: &ClusterConfig,
    identity: ClusterIdentity,
    directory: Arc<dyn NameDirectory>,
    metrics: SharedMetrics,
) -> ClusterCoordinator {
    let preparation = preparation(config, &identity);
    ClusterCoordinator::new(
        identity,
        &config.naming_domain,
        directory,
        preparation,
        supervisor(config),
    )
    .with_poll_timeout(config.timing.poll_timeout)
    .with_provisional_claim(config.provisional_claim)
    .with_metrics(metrics)
}

/// Promotion guard wired to the configured collaborators.
pub fn promotion_guard(
    config: &ClusterConfig,
    identity: ClusterIdentity,
    directory: Arc<dyn NameDirectory>,
    metrics: SharedMetrics,
) -> Result<PromotionGuard> {
    Ok(PromotionGuard::new(
        identity,
        &config.naming_domain,
        directory,
        health_check(config)?,
        promoter(config)?,
    )
    .with_local_host(&config.postgres.local_host)
    .with_refuse_unreachable(config.refuse_unreachable_incumbent)
    .with_metrics(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use replicant_directory::InMemoryDirectory;

    use crate::metrics::CoordinationMetrics;

    #[tokio::test]
    async fn test_identity_from_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let user_data = dir.path().join("user-data.json");
        let instance = dir.path().join("instance.json");
        std::fs::write(&user_data, r#"{"cluster": "vagranttest", "instance-id": "i-0"}"#).unwrap();
        std::fs::write(
            &instance,
            r#"{"instance-id": "i-1234", "public-hostname": "ec2-1-2-3-4.compute.amazonaws.com"}"#,
        )
        .unwrap();

        let config = ClusterConfig {
            metadata: MetadataConfig::JsonFile {
                user_data,
                instance: Some(instance),
            },
            ..Default::default()
        };

        let identity = load_identity(&config).await.unwrap();
        assert_eq!(identity.cluster(), "vagranttest");
        assert_eq!(identity.address(), "ec2-1-2-3-4.compute.amazonaws.com");
        assert_eq!(identity.instance_id(), Some("i-1234"));
        assert_eq!(
            identity.primary_name(&config.naming_domain).as_str(),
            "master.vagranttest.example.com"
        );
    }

    #[tokio::test]
    async fn test_identity_requires_address() {
        let dir = tempfile::tempdir().unwrap();
        let user_data = dir.path().join("user-data.json");
        std::fs::write(&user_data, r#"{"cluster": "vagranttest"}"#).unwrap();

        let config = ClusterConfig {
            metadata: MetadataConfig::JsonFile {
                user_data,
                instance: None,
            },
            ..Default::default()
        };

        let err = load_identity(&config).await.unwrap_err();
        assert!(matches!(err, ClusterError::MissingMetadata(key) if key == "public-hostname"));
    }

    #[tokio::test]
    async fn test_directory_requires_url() {
        let err = connect_directory(&ClusterConfig::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_flavor_selection() {
        let identity = ClusterIdentity::new("test", "10.0.0.1", BTreeMap::new());

        let mut config = ClusterConfig::default();
        assert_eq!(preparation(&config, &identity).flavor(), "postgres");
        assert!(health_check(&config).is_ok());
        assert!(promoter(&config).is_ok());

        config.flavor = Flavor::Script;
        assert_eq!(preparation(&config, &identity).flavor(), "script");
        assert!(promoter(&config).is_err());
        assert!(health_check(&config).is_err());
    }

    #[test]
    fn test_wiring() {
        let config = ClusterConfig {
            provisional_claim: true,
            ..Default::default()
        };
        let identity = ClusterIdentity::new("test", "10.0.0.1", BTreeMap::new());
        let directory: Arc<dyn NameDirectory> = Arc::new(InMemoryDirectory::new());
        let metrics = Arc::new(CoordinationMetrics::new());

        let coordinator = coordinator(&config, identity.clone(), directory.clone(), metrics.clone());
        assert_eq!(coordinator.primary_name().as_str(), "master.test.example.com");
        assert!(Arc::ptr_eq(coordinator.metrics(), &metrics));

        let guard = promotion_guard(&config, identity, directory, metrics).unwrap();
        assert_eq!(guard.primary_name(), coordinator.primary_name());
    }
}
