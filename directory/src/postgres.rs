//! Directory stored in a PostgreSQL table.
//!
//! Conditional writes are expressed as single statements
//! (`INSERT ... ON CONFLICT ... DO UPDATE ... WHERE`, `DELETE ... WHERE`),
//! so the database's row lock gives every claim compare-and-swap semantics.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument, warn};

use replicant_common::{ClusterError, PrimaryName, PrimaryRecord, Result};

use crate::directory::{ClaimMode, NameDirectory};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS replicant_primary_records (
    name TEXT PRIMARY KEY,
    address TEXT NOT NULL,
    claimed_at TIMESTAMPTZ NOT NULL
)"#;

const SELECT_RECORD: &str =
    "SELECT address, claimed_at FROM replicant_primary_records WHERE name = $1";

// $1 name, $2 caller address, $3 address allowed to be replaced (may equal $2).
const CLAIM_CONDITIONAL: &str = r#"
INSERT INTO replicant_primary_records (name, address, claimed_at)
VALUES ($1, $2, now())
ON CONFLICT (name) DO UPDATE
    SET address = EXCLUDED.address,
        claimed_at = CASE
            WHEN replicant_primary_records.address = EXCLUDED.address
                THEN replicant_primary_records.claimed_at
            ELSE EXCLUDED.claimed_at
        END
    WHERE replicant_primary_records.address = $2
       OR replicant_primary_records.address = $3
RETURNING address, claimed_at"#;

const CLAIM_FORCE: &str = r#"
INSERT INTO replicant_primary_records (name, address, claimed_at)
VALUES ($1, $2, now())
ON CONFLICT (name) DO UPDATE
    SET address = EXCLUDED.address,
        claimed_at = CASE
            WHEN replicant_primary_records.address = EXCLUDED.address
                THEN replicant_primary_records.claimed_at
            ELSE EXCLUDED.claimed_at
        END
RETURNING address, claimed_at"#;

const RELEASE: &str =
    "DELETE FROM replicant_primary_records WHERE name = $1 AND address = $2";

/// Directory backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    /// Create a directory over a lazily connected pool.
    ///
    /// No connection is made until the first call; `acquire_timeout` bounds
    /// how long any call waits for one.
    pub fn connect_lazy(url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .map_err(|e| ClusterError::ConfigurationError(format!("directory url: {}", e)))?;
        Ok(Self { pool })
    }

    /// Create a directory over an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the records table if it does not exist.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn holder(&self, name: &PrimaryName) -> Result<String> {
        let record = self.lookup(name).await?;
        // The binding can disappear between the failed claim and this read.
        Ok(record
            .address()
            .map(str::to_string)
            .unwrap_or_else(|| "<released>".to_string()))
    }
}

#[async_trait]
impl NameDirectory for PgDirectory {
    fn backend(&self) -> &str {
        "postgres"
    }

    async fn lookup(&self, name: &PrimaryName) -> Result<PrimaryRecord> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(SELECT_RECORD)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(match row {
            Some((address, claimed_at)) => PrimaryRecord::bound(name.clone(), address, claimed_at),
            None => PrimaryRecord::absent(name.clone()),
        })
    }

    #[instrument(skip(self, name), fields(name = %name))]
    async fn claim(
        &self,
        name: &PrimaryName,
        address: &str,
        mode: ClaimMode,
    ) -> Result<PrimaryRecord> {
        let query = match &mode {
            ClaimMode::IfAbsent => sqlx::query_as::<_, (String, DateTime<Utc>)>(CLAIM_CONDITIONAL)
                .bind(name.as_str())
                .bind(address)
                .bind(address),
            ClaimMode::ReplaceIfHeldBy(expected) => {
                sqlx::query_as::<_, (String, DateTime<Utc>)>(CLAIM_CONDITIONAL)
                    .bind(name.as_str())
                    .bind(address)
                    .bind(expected.as_str())
            }
            ClaimMode::Force => sqlx::query_as::<_, (String, DateTime<Utc>)>(CLAIM_FORCE)
                .bind(name.as_str())
                .bind(address),
        };

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match row {
            Some((bound, claimed_at)) => {
                info!(address = %bound, mode = ?mode, "Primary name claimed");
                Ok(PrimaryRecord::bound(name.clone(), bound, claimed_at))
            }
            None => {
                let holder = self.holder(name).await?;
                warn!(address, holder = %holder, "Primary name held by another node");
                Err(ClusterError::AlreadyClaimed {
                    name: name.to_string(),
                    holder,
                })
            }
        }
    }

    #[instrument(skip(self, name), fields(name = %name))]
    async fn release(&self, name: &PrimaryName, address: &str) -> Result<bool> {
        let result = sqlx::query(RELEASE)
            .bind(name.as_str())
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!(address, "Primary name released");
        }
        Ok(removed)
    }
}

fn unavailable(error: sqlx::Error) -> ClusterError {
    ClusterError::DirectoryUnavailable(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_configuration_error() {
        let err = PgDirectory::connect_lazy("not a url", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_conditional_claim_guards_on_holder() {
        assert!(CLAIM_CONDITIONAL.contains("WHERE replicant_primary_records.address = $2"));
        assert!(!CLAIM_FORCE.contains("WHERE"));
        assert!(RELEASE.contains("AND address = $2"));
    }

    // The tests below need a live server: DATABASE_URL=postgres://... cargo test -- --ignored

    async fn live_directory() -> PgDirectory {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let directory = PgDirectory::connect_lazy(&url, Duration::from_secs(5)).unwrap();
        directory.ensure_schema().await.unwrap();
        directory
    }

    fn unique_name() -> PrimaryName {
        PrimaryName::for_cluster(&uuid::Uuid::new_v4().simple().to_string(), "test.internal")
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_live_claim_if_absent() {
        let directory = live_directory().await;
        let name = unique_name();

        assert!(directory.lookup(&name).await.unwrap().is_absent());

        let first = directory.claim(&name, "10.0.0.1", ClaimMode::IfAbsent).await.unwrap();
        assert!(first.is_held_by("10.0.0.1"));

        // Claiming again for the same holder keeps the original timestamp.
        let again = directory.claim(&name, "10.0.0.1", ClaimMode::IfAbsent).await.unwrap();
        assert_eq!(again, first);

        let err = directory.claim(&name, "10.0.0.2", ClaimMode::IfAbsent).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyClaimed { ref holder, .. } if holder == "10.0.0.1"));
        assert!(directory.lookup(&name).await.unwrap().is_held_by("10.0.0.1"));

        assert!(directory.release(&name, "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_live_release_is_compare_and_delete() {
        let directory = live_directory().await;
        let name = unique_name();
        directory.claim(&name, "10.0.0.1", ClaimMode::IfAbsent).await.unwrap();

        assert!(!directory.release(&name, "10.0.0.2").await.unwrap());
        assert!(directory.lookup(&name).await.unwrap().is_held_by("10.0.0.1"));

        assert!(directory.release(&name, "10.0.0.1").await.unwrap());
        assert!(directory.lookup(&name).await.unwrap().is_absent());
        assert!(!directory.release(&name, "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_live_replace_if_held_by() {
        let directory = live_directory().await;
        let name = unique_name();
        directory.claim(&name, "10.0.0.1", ClaimMode::IfAbsent).await.unwrap();

        // A stale view of the holder must not win.
        let stale = ClaimMode::ReplaceIfHeldBy("10.0.0.9".to_string());
        let err = directory.claim(&name, "10.0.0.2", stale).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyClaimed { .. }));
        assert!(directory.lookup(&name).await.unwrap().is_held_by("10.0.0.1"));

        let expected = ClaimMode::ReplaceIfHeldBy("10.0.0.1".to_string());
        let record = directory.claim(&name, "10.0.0.2", expected).await.unwrap();
        assert!(record.is_held_by("10.0.0.2"));

        let record = directory.claim(&name, "10.0.0.3", ClaimMode::Force).await.unwrap();
        assert!(record.is_held_by("10.0.0.3"));

        assert!(directory.release(&name, "10.0.0.3").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_live_concurrent_claims_single_winner() {
        let directory = live_directory().await;
        let name = unique_name();

        let claims = (0..16).map(|i| {
            let directory = directory.clone();
            let name = name.clone();
            tokio::spawn(async move {
                let address = format!("10.0.1.{}", i);
                directory
                    .claim(&name, &address, ClaimMode::IfAbsent)
                    .await
                    .map(|_| address)
            })
        });

        let mut winners = Vec::new();
        for handle in claims.collect::<Vec<_>>() {
            match handle.await.unwrap() {
                Ok(address) => winners.push(address),
                Err(e) => assert!(matches!(e, ClusterError::AlreadyClaimed { .. }), "{}", e),
            }
        }

        assert_eq!(winners.len(), 1, "{:?}", winners);
        let record = directory.lookup(&name).await.unwrap();
        assert!(record.is_held_by(&winners[0]));

        assert!(directory.release(&name, &winners[0]).await.unwrap());
    }
}
