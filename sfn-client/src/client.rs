//! # Async Client API
//!
//! Purpose: Expose a compact, async API for issuing the Redis-compatible
//! commands a prefixing JSON cache needs over RESP2.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Fail Fast**: Protocol violations surface immediately as errors.
//! 4. **Explicit Lifecycle**: `quit` moves the client through
//!    `Open -> Closing -> Closed`; every clone observes the same state.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::pool::{ConnectionPool, PoolConfig};
use crate::resp::{encode_u64, RespValue};

/// Result type for the async client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the async client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Every pool slot stayed in use past the connect timeout.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// The client was shut down with `quit`.
    #[error("client is closed")]
    Closed,
}

/// Connection lifecycle reported by a store client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Accepting commands.
    Open,
    /// `quit` was requested; connections are being torn down.
    Closing,
    /// No further commands will be accepted.
    Closed,
}

/// Configuration for the async client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional read timeout per response.
    pub read_timeout: Option<Duration>,
    /// Optional write timeout per request.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Password for AUTH, sent on each new connection.
    pub password: Option<String>,
    /// Logical database for SELECT, sent on each new connection.
    pub db: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
            password: None,
            db: None,
        }
    }
}

/// Async client with connection pooling.
///
/// Each call acquires a connection, executes one command, and returns the
/// connection to the pool. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct KVClient {
    pool: ConnectionPool,
}

impl KVClient {
    /// Creates a client with default configuration for `addr`.
    pub fn connect(addr: impl Into<String>) -> Self {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    ///
    /// No connection is opened until the first command.
    pub fn with_config(config: ClientConfig) -> Self {
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
            password: config.password,
            db: config.db,
        });
        KVClient { pool }
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub async fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        let mut conn = self.pool.acquire().await?;
        match conn.exec(&[b"GET", key]).await? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key without expiration.
    pub async fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        let mut conn = self.pool.acquire().await?;
        match conn.exec(&[b"SET", key, value]).await? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value that expires after `ttl`, with millisecond precision.
    pub async fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let (digits, len) = encode_u64(millis);
        let mut conn = self.pool.acquire().await?;
        match conn.exec(&[b"SET", key, value, b"PX", &digits[..len]]).await? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns the number of keys removed.
    pub async fn delete(&self, key: &[u8]) -> ClientResult<u64> {
        let mut conn = self.pool.acquire().await?;
        match conn.exec(&[b"DEL", key]).await? {
            RespValue::Integer(count) => Ok(count.max(0) as u64),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Lists keys matching a glob pattern, in server order.
    pub async fn keys(&self, pattern: &[u8]) -> ClientResult<Vec<Vec<u8>>> {
        let mut conn = self.pool.acquire().await?;
        match conn.exec(&[b"KEYS", pattern]).await? {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(Some(key)) => Ok(key),
                    _ => Err(ClientError::UnexpectedResponse),
                })
                .collect(),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        self.pool.status()
    }

    /// Shuts the client down without waiting.
    ///
    /// Idle connections receive `QUIT` on a background task when a tokio
    /// runtime is available; otherwise they are dropped. In-flight commands
    /// finish, later ones fail with `ClientError::Closed`.
    pub fn quit(&self) {
        if self.pool.status() != ConnectionStatus::Open {
            return;
        }
        let idle = self.pool.shutdown();
        debug!(addr = self.pool.addr(), idle = idle.len(), "quitting client");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move {
                    for mut conn in idle {
                        if let Err(err) = conn.exec(&[b"QUIT"]).await {
                            warn!(addr = pool.addr(), error = %err, "QUIT failed");
                        }
                    }
                    pool.mark_closed();
                });
            }
            Err(_) => {
                drop(idle);
                self.pool.mark_closed();
            }
        }
    }
}
