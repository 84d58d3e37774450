//! Cluster identity and primary name types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{ClusterError, Result};

/// Metadata key holding the cluster name.
pub const CLUSTER_KEY: &str = "cluster";

/// Metadata key holding the instance identifier, when supplied.
pub const INSTANCE_ID_KEY: &str = "instance-id";

/// Well-known, cluster-scoped name that should always resolve to the current primary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimaryName(String);

impl PrimaryName {
    /// Build the primary name `master.<cluster>.<domain>`.
    pub fn for_cluster(cluster: &str, domain: &str) -> Self {
        let domain = domain.trim_matches('.');
        Self(format!("master.{}.{}", cluster, domain))
    }

    /// Wrap an already formatted name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrimaryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable identity of the local node, built once from instance metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    /// Cluster name.
    cluster: String,
    /// Address other nodes and clients reach this instance at.
    address: String,
    /// All metadata attributes, including `cluster`.
    attributes: BTreeMap<String, String>,
}

impl ClusterIdentity {
    /// Create an identity from explicit parts.
    pub fn new(
        cluster: impl Into<String>,
        address: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        let cluster = cluster.into();
        let mut attributes = attributes;
        attributes
            .entry(CLUSTER_KEY.to_string())
            .or_insert_with(|| cluster.clone());
        Self {
            cluster,
            address: address.into(),
            attributes,
        }
    }

    /// Build an identity from a metadata mapping.
    ///
    /// The cluster name comes from the `cluster` key and the address from
    /// `address_key`; both must be present and non-empty.
    pub fn from_metadata(
        metadata: BTreeMap<String, String>,
        address_key: &str,
    ) -> Result<Self> {
        let cluster = required(&metadata, CLUSTER_KEY)?;
        let address = required(&metadata, address_key)?;
        Ok(Self {
            cluster,
            address,
            attributes: metadata,
        })
    }

    /// Cluster name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Address of this instance.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Instance identifier, if the metadata carried one.
    pub fn instance_id(&self) -> Option<&str> {
        self.attribute(INSTANCE_ID_KEY)
    }

    /// Look up a single metadata attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All metadata attributes.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Primary name for this node's cluster under the given domain.
    pub fn primary_name(&self, domain: &str) -> PrimaryName {
        PrimaryName::for_cluster(&self.cluster, domain)
    }
}

fn required(metadata: &BTreeMap<String, String>, key: &str) -> Result<String> {
    metadata
        .get(key)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ClusterError::MissingMetadata(key.to_string()))
}
