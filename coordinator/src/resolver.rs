//! Role resolution against the name directory.

use std::sync::Arc;

use tracing::{info, instrument};

use replicant_common::{ClusterIdentity, PrimaryName, Result, Role};
use replicant_directory::NameDirectory;

/// Decides whether a node starts as primary or replica.
///
/// Resolution only reads the directory; publishing the role is the
/// coordinator's job once the process is up.
pub struct RoleResolver {
    directory: Arc<dyn NameDirectory>,
    naming_domain: String,
}

impl RoleResolver {
    /// Create a resolver over `directory` for names under `naming_domain`.
    pub fn new(directory: Arc<dyn NameDirectory>, naming_domain: impl Into<String>) -> Self {
        Self {
            directory,
            naming_domain: naming_domain.into(),
        }
    }

    /// Published primary name for the node's cluster.
    pub fn primary_name(&self, identity: &ClusterIdentity) -> PrimaryName {
        identity.primary_name(&self.naming_domain)
    }

    /// Resolve the role for `identity`.
    ///
    /// An absent record, or one already bound to this node's own address,
    /// yields `Primary`; any other binding yields `Replica`. Directory
    /// failures propagate unchanged.
    #[instrument(skip(self, identity), fields(cluster = %identity.cluster()))]
    pub async fn resolve(&self, identity: &ClusterIdentity) -> Result<Role> {
        let name = self.primary_name(identity);
        let record = self.directory.lookup(&name).await?;

        let role = match record.address() {
            None => Role::Primary,
            Some(holder) if holder == identity.address() => Role::Primary,
            Some(_) => Role::Replica,
        };

        info!(
            name = %name,
            holder = record.address().unwrap_or("-"),
            role = %role,
            "Role resolved"
        );
        Ok(role)
    }
}
