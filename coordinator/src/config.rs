//! Node configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use replicant_common::{constants, ClusterError, Result};

/// Timeouts bounding every blocking step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Ceiling on waiting for a process outcome after start.
    #[serde(with = "seconds")]
    pub poll_timeout: Duration,
    /// Interval between process status checks.
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    /// Bound on each directory call.
    #[serde(with = "seconds")]
    pub directory_timeout: Duration,
    /// Connect timeout for database health checks.
    #[serde(with = "seconds")]
    pub health_check_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_timeout: constants::poll_timeout(),
            poll_interval: constants::poll_interval(),
            directory_timeout: constants::directory_timeout(),
            health_check_timeout: constants::health_check_timeout(),
        }
    }
}

/// Where instance metadata comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataConfig {
    /// Process environment with a fixed cluster name.
    Env { cluster: String },
    /// User-data JSON, optionally merged with instance metadata JSON.
    JsonFile {
        user_data: PathBuf,
        instance: Option<PathBuf>,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig::Env {
            cluster: "localtest".to_string(),
        }
    }
}

/// Deployment flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    /// Run a script per role and start a generic init.d service.
    Script,
    /// PostgreSQL streaming replication.
    Postgres,
}

/// Script flavor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Init script name under `/etc/init.d`.
    pub service_name: String,
    /// Executable run before starting as primary.
    pub master_script: PathBuf,
    /// Executable run before starting as replica.
    pub replica_script: PathBuf,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            service_name: "replicant-service".to_string(),
            master_script: PathBuf::from("/etc/replicant/master.sh"),
            replica_script: PathBuf::from("/etc/replicant/replica.sh"),
        }
    }
}

/// PostgreSQL flavor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Init script name under `/etc/init.d`.
    pub service_name: String,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Path to `pg_ctl`.
    pub pg_ctl: PathBuf,
    /// OS user owning the data directory.
    pub os_user: String,
    /// Server port.
    pub port: u16,
    /// Role used for health checks.
    pub user: String,
    /// Password for the health-check role.
    pub password: Option<String>,
    /// Database used for health checks.
    pub database: String,
    /// Host of the local server.
    pub local_host: String,
    /// Replication settings template.
    pub recovery_template_path: PathBuf,
    /// Where the rendered replication settings are written.
    pub recovery_output_path: PathBuf,
    /// Extra template values.
    pub settings: BTreeMap<String, String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("/var/lib/postgresql/9.1/main");
        Self {
            service_name: "postgresql".to_string(),
            recovery_output_path: data_dir.join("recovery.conf"),
            data_dir,
            pg_ctl: PathBuf::from("/usr/lib/postgresql/9.1/bin/pg_ctl"),
            os_user: "postgres".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
            local_host: "localhost".to_string(),
            recovery_template_path: PathBuf::from("/etc/replicant/recovery.conf.tmpl"),
            settings: BTreeMap::new(),
        }
    }
}

/// Main node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Domain suffix of the primary name.
    pub naming_domain: String,
    /// Metadata key holding this instance's address.
    pub address_key: String,
    /// Connection URL of the directory database.
    pub directory_url: Option<String>,
    /// Claim the primary name before starting the process instead of after.
    pub provisional_claim: bool,
    /// Refuse to promote over an unreachable incumbent unless forced.
    pub refuse_unreachable_incumbent: bool,
    /// Timeouts.
    pub timing: TimingConfig,
    /// Metadata source.
    pub metadata: MetadataConfig,
    /// Deployment flavor.
    pub flavor: Flavor,
    /// Script flavor settings.
    pub script: ScriptConfig,
    /// PostgreSQL flavor settings.
    pub postgres: PostgresConfig,
    /// Log level.
    pub log_level: String,
    /// Environment overrides whose values could not be used.
    #[serde(skip)]
    pub invalid_overrides: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            naming_domain: "example.com".to_string(),
            address_key: "public-hostname".to_string(),
            directory_url: None,
            provisional_claim: false,
            refuse_unreachable_incumbent: false,
            timing: TimingConfig::default(),
            metadata: MetadataConfig::default(),
            flavor: Flavor::Postgres,
            script: ScriptConfig::default(),
            postgres: PostgresConfig::default(),
            log_level: "info".to_string(),
            invalid_overrides: Vec::new(),
        }
    }
}

impl ClusterConfig {
    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            ClusterError::ConfigurationError(format!("{}: {}", path.display(), e))
        })
    }

    /// Apply `REPLICANT_*` overrides read through `lookup`.
    ///
    /// A value that cannot be parsed leaves the setting unchanged and is
    /// reported by [`validate`](Self::validate).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(domain) = lookup("REPLICANT_NAMING_DOMAIN") {
            self.naming_domain = domain;
        }

        if let Some(key) = lookup("REPLICANT_ADDRESS_KEY") {
            self.address_key = key;
        }

        if let Some(url) = lookup("REPLICANT_DIRECTORY_URL") {
            self.directory_url = Some(url);
        }

        if let Some(secs) = lookup("REPLICANT_POLL_TIMEOUT") {
            match secs.trim().parse() {
                Ok(secs) => self.timing.poll_timeout = Duration::from_secs(secs),
                Err(_) => self.reject_override("REPLICANT_POLL_TIMEOUT", &secs),
            }
        }

        if let Some(flag) = lookup("REPLICANT_PROVISIONAL_CLAIM") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.provisional_claim = true,
                "0" | "false" | "no" => self.provisional_claim = false,
                _ => self.reject_override("REPLICANT_PROVISIONAL_CLAIM", &flag),
            }
        }

        if let Some(flavor) = lookup("REPLICANT_FLAVOR") {
            match flavor.trim() {
                "script" => self.flavor = Flavor::Script,
                "postgres" => self.flavor = Flavor::Postgres,
                _ => self.reject_override("REPLICANT_FLAVOR", &flavor),
            }
        }

        if let Some(path) = lookup("REPLICANT_RECOVERY_TEMPLATE") {
            self.postgres.recovery_template_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("REPLICANT_RECOVERY_OUTPUT") {
            self.postgres.recovery_output_path = PathBuf::from(path);
        }

        if let Some(cluster) = lookup("REPLICANT_CLUSTER") {
            if let MetadataConfig::Env { cluster: current } = &mut self.metadata {
                *current = cluster;
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    fn reject_override(&mut self, key: &str, value: &str) {
        warn!(key, value, "Ignoring invalid configuration override");
        self.invalid_overrides.push(format!("{}={:?}", key, value));
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.invalid_overrides.is_empty() {
            return Err(format!(
                "Invalid environment overrides: {}",
                self.invalid_overrides.join(", ")
            ));
        }

        if self.naming_domain.trim_matches('.').is_empty() {
            return Err("Naming domain cannot be empty".to_string());
        }

        if self.address_key.is_empty() {
            return Err("Address key cannot be empty".to_string());
        }

        if self.timing.poll_timeout.is_zero() {
            return Err("Poll timeout cannot be zero".to_string());
        }

        if self.timing.poll_interval.is_zero() {
            return Err("Poll interval cannot be zero".to_string());
        }

        if self.timing.poll_interval > self.timing.poll_timeout {
            return Err("Poll interval cannot exceed poll timeout".to_string());
        }

        if self.timing.directory_timeout.is_zero() {
            return Err("Directory timeout cannot be zero".to_string());
        }

        if self.flavor == Flavor::Postgres
            && self.postgres.recovery_template_path.as_os_str().is_empty()
        {
            return Err("Recovery template path cannot be empty".to_string());
        }

        Ok(())
    }
}

/// Durations written as (fractional) seconds.
mod seconds {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
