//! Database endpoint health checks.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::{debug, instrument};

use replicant_common::{ClusterError, Result};

/// Checks a database endpoint by address.
///
/// An endpoint that cannot be reached fails with `IncumbentUnreachable`,
/// which callers must treat differently from a reachable replica. A server
/// that answers but rejects the session (bad credentials, missing database,
/// still starting) is reachable and fails with `DatabaseError`.
#[async_trait]
pub trait DatabaseHealthCheck: Send + Sync {
    /// Check that the server at `address` answers a trivial query.
    async fn ping(&self, address: &str) -> Result<bool>;

    /// Check whether the server at `address` is replaying as a replica.
    async fn is_in_recovery(&self, address: &str) -> Result<bool>;
}

/// PostgreSQL health check over a short-lived connection.
#[derive(Debug, Clone)]
pub struct PgHealthCheck {
    port: u16,
    user: String,
    database: String,
    password: Option<String>,
    connect_timeout: Duration,
}

impl PgHealthCheck {
    /// Create a health check connecting as `user` to `database` on `port`.
    pub fn new(
        port: u16,
        user: impl Into<String>,
        database: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            port,
            user: user.into(),
            database: database.into(),
            password: None,
            connect_timeout,
        }
    }

    /// Authenticate with a password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn options(&self, address: &str) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(address)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    async fn connect(&self, address: &str) -> Result<PgConnection> {
        let options = self.options(address);
        match tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&options)).await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(classify_connect_error(address, e)),
            Err(_) => Err(ClusterError::IncumbentUnreachable {
                address: address.to_string(),
                reason: format!("connect timed out after {:?}", self.connect_timeout),
            }),
        }
    }
}

/// Only transport failures mean the endpoint is unreachable.
fn classify_connect_error(address: &str, error: sqlx::Error) -> ClusterError {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
            ClusterError::IncumbentUnreachable {
                address: address.to_string(),
                reason: error.to_string(),
            }
        }
        other => ClusterError::DatabaseError(format!("{}: {}", address, other)),
    }
}

#[async_trait]
impl DatabaseHealthCheck for PgHealthCheck {
    #[instrument(skip(self))]
    async fn ping(&self, address: &str) -> Result<bool> {
        let mut conn = self.connect(address).await?;
        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&mut conn)
            .await;
        let _ = conn.close().await;

        let value = result.map_err(|e| ClusterError::DatabaseError(e.to_string()))?;
        debug!(value, "Ping answered");
        Ok(value == 1)
    }

    #[instrument(skip(self))]
    async fn is_in_recovery(&self, address: &str) -> Result<bool> {
        let mut conn = self.connect(address).await?;
        let result = sqlx::query_scalar::<_, bool>("SELECT pg_is_in_recovery()")
            .fetch_one(&mut conn)
            .await;
        let _ = conn.close().await;

        let in_recovery = result.map_err(|e| ClusterError::DatabaseError(e.to_string()))?;
        debug!(in_recovery, "Recovery status answered");
        Ok(in_recovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SSL_REQUEST_CODE: u32 = 80877103;

    /// Accept one connection and reject its startup with `sqlstate`.
    async fn rejecting_server(sqlstate: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut len = socket.read_u32().await.unwrap();
            let mut body = vec![0u8; len as usize - 4];
            socket.read_exact(&mut body).await.unwrap();
            if len == 8 && u32::from_be_bytes([body[0], body[1], body[2], body[3]]) == SSL_REQUEST_CODE {
                socket.write_all(b"N").await.unwrap();
                len = socket.read_u32().await.unwrap();
                body = vec![0u8; len as usize - 4];
                socket.read_exact(&mut body).await.unwrap();
            }

            let mut fields = Vec::new();
            for (tag, value) in [
                (b'S', "FATAL"),
                (b'V', "FATAL"),
                (b'C', sqlstate),
                (b'M', "password authentication failed for user \"postgres\""),
            ] {
                fields.push(tag);
                fields.extend_from_slice(value.as_bytes());
                fields.push(0);
            }
            fields.push(0);

            let mut message = vec![b'E'];
            message.extend_from_slice(&(fields.len() as u32 + 4).to_be_bytes());
            message.extend_from_slice(&fields);
            socket.write_all(&message).await.unwrap();
            let _ = socket.flush().await;
        });

        port
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        // Port 1 on loopback refuses connections.
        let check = PgHealthCheck::new(1, "postgres", "postgres", Duration::from_secs(2));

        let err = check.ping("127.0.0.1").await.unwrap_err();
        assert!(
            matches!(err, ClusterError::IncumbentUnreachable { ref address, .. } if address == "127.0.0.1")
        );

        let err = check.is_in_recovery("127.0.0.1").await.unwrap_err();
        assert_eq!(err.error_code(), "INCUMBENT_UNREACHABLE");
    }

    #[tokio::test]
    async fn test_rejected_login_is_reachable() {
        let port = rejecting_server("28P01").await;
        let check = PgHealthCheck::new(port, "postgres", "postgres", Duration::from_secs(5))
            .with_password("wrong");

        let err = check.ping("127.0.0.1").await.unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR", "{}", err);
    }

    #[tokio::test]
    async fn test_starting_server_is_reachable() {
        let port = rejecting_server("57P03").await;
        let check = PgHealthCheck::new(port, "postgres", "postgres", Duration::from_secs(5));

        let err = check.is_in_recovery("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, ClusterError::DatabaseError(_)), "{}", err);
    }
}
