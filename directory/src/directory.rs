//! Directory trait and claim modes.

use std::sync::Arc;

use async_trait::async_trait;

use replicant_common::{PrimaryName, PrimaryRecord, Result};

/// Condition under which a claim may bind the primary name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimMode {
    /// Bind only if no address is bound, or the caller's address already is.
    IfAbsent,
    /// Like `IfAbsent`, but also replace a binding to exactly this address.
    ///
    /// Used to take over from an incumbent observed to be dead or demoted;
    /// if another node re-bound the name in between, the claim fails.
    ReplaceIfHeldBy(String),
    /// Overwrite any existing binding.
    Force,
}

impl ClaimMode {
    /// Check if the mode allows replacing a binding held by `holder`.
    pub fn permits_replacing(&self, holder: &str) -> bool {
        match self {
            ClaimMode::IfAbsent => false,
            ClaimMode::ReplaceIfHeldBy(expected) => expected == holder,
            ClaimMode::Force => true,
        }
    }
}

/// Shared naming service holding the primary binding for each cluster.
///
/// Implementations must make `claim` and `release` atomic with respect to
/// the current binding; a plain last-writer-wins store is not sufficient.
#[async_trait]
pub trait NameDirectory: Send + Sync {
    /// Backend name used in logs.
    fn backend(&self) -> &str;

    /// Look up the current binding. An absent binding is `Ok`, not an error.
    async fn lookup(&self, name: &PrimaryName) -> Result<PrimaryRecord>;

    /// Bind `name` to `address` subject to `mode`.
    ///
    /// Claiming for an address that already holds the name succeeds without
    /// change. Fails with `AlreadyClaimed` when another address holds the
    /// name and `mode` does not permit replacing it.
    async fn claim(&self, name: &PrimaryName, address: &str, mode: ClaimMode)
        -> Result<PrimaryRecord>;

    /// Remove the binding only if it points at `address`.
    ///
    /// Returns whether a binding was removed.
    async fn release(&self, name: &PrimaryName, address: &str) -> Result<bool>;
}

#[async_trait]
impl<D: NameDirectory + ?Sized> NameDirectory for Arc<D> {
    fn backend(&self) -> &str {
        (**self).backend()
    }

    async fn lookup(&self, name: &PrimaryName) -> Result<PrimaryRecord> {
        (**self).lookup(name).await
    }

    async fn claim(
        &self,
        name: &PrimaryName,
        address: &str,
        mode: ClaimMode,
    ) -> Result<PrimaryRecord> {
        (**self).claim(name, address, mode).await
    }

    async fn release(&self, name: &PrimaryName, address: &str) -> Result<bool> {
        (**self).release(name, address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits_replacing() {
        assert!(!ClaimMode::IfAbsent.permits_replacing("10.0.0.1"));
        assert!(ClaimMode::Force.permits_replacing("10.0.0.1"));

        let mode = ClaimMode::ReplaceIfHeldBy("10.0.0.1".to_string());
        assert!(mode.permits_replacing("10.0.0.1"));
        assert!(!mode.permits_replacing("10.0.0.2"));
    }
}
