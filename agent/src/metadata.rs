//! Instance metadata sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use replicant_common::{ClusterError, Result, CLUSTER_KEY};

/// Supplies the key/value attributes describing this instance.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Source name used in logs.
    fn name(&self) -> &str;

    /// Fetch the metadata mapping. Must contain at least `cluster`.
    async fn metadata(&self) -> Result<BTreeMap<String, String>>;
}

/// Fixed metadata, for tests and static deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataSource {
    values: BTreeMap<String, String>,
}

impl StaticMetadataSource {
    /// Create from a mapping.
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Add a single value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn metadata(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.values.clone())
    }
}

/// Metadata taken from the process environment, with a fixed cluster name.
///
/// Meant for local test machines that have no instance metadata service.
#[derive(Debug, Clone)]
pub struct EnvMetadataSource {
    cluster: String,
}

impl EnvMetadataSource {
    /// Create a source that reports `cluster` as the cluster name.
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    /// Build the mapping from an explicit set of variables.
    pub fn collect<I>(&self, vars: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut values: BTreeMap<String, String> = vars.into_iter().collect();
        values.insert(CLUSTER_KEY.to_string(), self.cluster.clone());
        values
    }
}

#[async_trait]
impl MetadataSource for EnvMetadataSource {
    fn name(&self) -> &str {
        "env"
    }

    async fn metadata(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.collect(std::env::vars()))
    }
}

/// Metadata read from JSON documents on disk.
///
/// The user-data document is read first; the optional instance document is
/// merged over it, so instance attributes win on conflicting keys.
#[derive(Debug, Clone)]
pub struct JsonFileMetadataSource {
    user_data: PathBuf,
    instance: Option<PathBuf>,
}

impl JsonFileMetadataSource {
    /// Create a source reading `user_data`.
    pub fn new(user_data: impl Into<PathBuf>) -> Self {
        Self {
            user_data: user_data.into(),
            instance: None,
        }
    }

    /// Also merge an instance metadata document.
    pub fn with_instance(mut self, instance: impl Into<PathBuf>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

#[async_trait]
impl MetadataSource for JsonFileMetadataSource {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn metadata(&self) -> Result<BTreeMap<String, String>> {
        let mut values = read_json_object(&self.user_data).await?;
        if let Some(instance) = &self.instance {
            values.extend(read_json_object(instance).await?);
        }
        debug!(keys = values.len(), "Loaded metadata from JSON");
        Ok(values)
    }
}

async fn read_json_object(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = tokio::fs::read_to_string(path).await?;
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        ClusterError::ConfigurationError(format!("{}: {}", path.display(), e))
    })?;

    let Value::Object(object) = value else {
        return Err(ClusterError::ConfigurationError(format!(
            "{}: expected a JSON object",
            path.display()
        )));
    };

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_source_overrides_cluster() {
        let source = EnvMetadataSource::new("localtest");
        let values = source.collect(vec![
            ("cluster".to_string(), "other".to_string()),
            ("HOSTNAME".to_string(), "box1".to_string()),
        ]);
        assert_eq!(values.get("cluster").map(String::as_str), Some("localtest"));
        assert_eq!(values.get("HOSTNAME").map(String::as_str), Some("box1"));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticMetadataSource::default().with("cluster", "test");
        let values = source.metadata().await.unwrap();
        assert_eq!(values.len(), 1);
    }

    #[tokio::test]
    async fn test_json_source_merges_instance_over_user_data() {
        let mut user_data = tempfile::NamedTempFile::new().unwrap();
        write!(user_data, r#"{{"cluster": "test", "replicas": 2, "zone": "a"}}"#).unwrap();
        let mut instance = tempfile::NamedTempFile::new().unwrap();
        write!(instance, r#"{{"zone": "b", "public-hostname": "10.0.0.1"}}"#).unwrap();

        let source = JsonFileMetadataSource::new(user_data.path()).with_instance(instance.path());
        let values = source.metadata().await.unwrap();

        assert_eq!(values["cluster"], "test");
        assert_eq!(values["replicas"], "2");
        assert_eq!(values["zone"], "b");
        assert_eq!(values["public-hostname"], "10.0.0.1");
    }

    #[tokio::test]
    async fn test_json_source_rejects_non_object() {
        let mut user_data = tempfile::NamedTempFile::new().unwrap();
        write!(user_data, "[1, 2]").unwrap();

        let err = JsonFileMetadataSource::new(user_data.path())
            .metadata()
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }
}
