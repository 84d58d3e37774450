//! In-process directory backed by a concurrent map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use replicant_common::{ClusterError, PrimaryBinding, PrimaryName, PrimaryRecord, Result};

use crate::directory::{ClaimMode, NameDirectory};

/// Directory kept in memory.
///
/// Each claim runs under the map's per-shard entry lock, so concurrent
/// claims for one name are serialized and at most one address is ever bound.
/// Cloning shares the underlying map, letting several coordinators in one
/// process contend for the same names.
#[derive(Debug, Clone)]
pub struct InMemoryDirectory {
    /// Bindings by primary name.
    records: Arc<DashMap<String, PrimaryBinding>>,
    /// When false every call fails with `DirectoryUnavailable`.
    available: Arc<AtomicBool>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the directory reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of bound names.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no names are bound.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClusterError::DirectoryUnavailable(
                "in-memory directory marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameDirectory for InMemoryDirectory {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn lookup(&self, name: &PrimaryName) -> Result<PrimaryRecord> {
        self.ensure_available()?;

        let record = match self.records.get(name.as_str()) {
            Some(binding) => PrimaryRecord {
                name: name.clone(),
                binding: Some(binding.clone()),
            },
            None => PrimaryRecord::absent(name.clone()),
        };
        Ok(record)
    }

    async fn claim(
        &self,
        name: &PrimaryName,
        address: &str,
        mode: ClaimMode,
    ) -> Result<PrimaryRecord> {
        self.ensure_available()?;

        let binding = match self.records.entry(name.as_str().to_string()) {
            Entry::Vacant(vacant) => {
                let binding = PrimaryBinding {
                    address: address.to_string(),
                    claimed_at: Utc::now(),
                };
                vacant.insert(binding.clone());
                info!(name = %name, address, "Primary name bound");
                binding
            }
            Entry::Occupied(mut occupied) => {
                let holder = occupied.get().address.clone();
                if holder == address {
                    debug!(name = %name, address, "Primary name already held by caller");
                    occupied.get().clone()
                } else if mode.permits_replacing(&holder) {
                    let binding = PrimaryBinding {
                        address: address.to_string(),
                        claimed_at: Utc::now(),
                    };
                    occupied.insert(binding.clone());
                    info!(
                        name = %name,
                        address,
                        previous = %holder,
                        "Primary name rebound"
                    );
                    binding
                } else {
                    return Err(ClusterError::AlreadyClaimed {
                        name: name.to_string(),
                        holder,
                    });
                }
            }
        };

        Ok(PrimaryRecord {
            name: name.clone(),
            binding: Some(binding),
        })
    }

    async fn release(&self, name: &PrimaryName, address: &str) -> Result<bool> {
        self.ensure_available()?;

        let removed = self
            .records
            .remove_if(name.as_str(), |_, binding| binding.address == address)
            .is_some();

        if removed {
            info!(name = %name, address, "Primary name released");
        } else {
            debug!(name = %name, address, "Release skipped, name not held by caller");
        }
        Ok(removed)
    }
}
