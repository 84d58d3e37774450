//! Published primary record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PrimaryName;

/// Address currently bound to a primary name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryBinding {
    /// Address of the node acting as primary.
    pub address: String,
    /// When the binding was written.
    pub claimed_at: DateTime<Utc>,
}

/// The primary name together with its binding, if any.
///
/// An absent binding means no primary has been published yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryRecord {
    /// Primary name that was looked up.
    pub name: PrimaryName,
    /// Current binding.
    pub binding: Option<PrimaryBinding>,
}

impl PrimaryRecord {
    /// A record with no binding.
    pub fn absent(name: PrimaryName) -> Self {
        Self { name, binding: None }
    }

    /// A record bound to `address`.
    pub fn bound(name: PrimaryName, address: impl Into<String>, claimed_at: DateTime<Utc>) -> Self {
        Self {
            name,
            binding: Some(PrimaryBinding {
                address: address.into(),
                claimed_at,
            }),
        }
    }

    /// Check if no primary is published.
    pub fn is_absent(&self) -> bool {
        self.binding.is_none()
    }

    /// Address of the published primary.
    pub fn address(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.address.as_str())
    }

    /// Check if the record is bound to `address`.
    pub fn is_held_by(&self, address: &str) -> bool {
        self.address() == Some(address)
    }
}
