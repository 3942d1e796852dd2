//! # Store Abstraction
//!
//! Purpose: Describe the handful of operations a cache handle needs from its
//! key-value backend, and adapt the workspace's two backends to it.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Cache` talks to `dyn KvStore`, never to a
//!    concrete client, so externally built clients can be adopted as-is.
//! 2. **Byte-Oriented**: Keys and values cross the boundary as raw bytes;
//!    JSON encoding stays in the cache layer.
//! 3. **Opaque Failures**: Backend errors are boxed and carried as the cause.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sfn_client::{ConnectionStatus, KVClient};
use sfn_engine::{ExpirationHandle, KVEngine, MemoryEngine};
use thiserror::Error;

/// Boxed failure reported by a store backend.
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Operations a cache handle issues against its backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads a key; `None` when absent.
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Writes a key without expiry.
    async fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Writes a key that expires after `ttl`.
    async fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Deletes a key, returning how many entries were removed.
    async fn delete(&self, key: &[u8]) -> StoreResult<u64>;

    /// Lists keys matching a Redis glob pattern.
    async fn keys(&self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>>;

    /// Asks the backend to terminate its connection. Does not wait.
    fn quit(&self);

    /// Current connection lifecycle state.
    fn status(&self) -> ConnectionStatus;
}

#[async_trait]
impl KvStore for KVClient {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(KVClient::get(self, key).await?)
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        Ok(KVClient::set(self, key, value).await?)
    }

    async fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> StoreResult<()> {
        Ok(KVClient::set_with_ttl(self, key, value, ttl).await?)
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<u64> {
        Ok(KVClient::delete(self, key).await?)
    }

    async fn keys(&self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        Ok(KVClient::keys(self, pattern).await?)
    }

    fn quit(&self) {
        KVClient::quit(self);
    }

    fn status(&self) -> ConnectionStatus {
        KVClient::status(self)
    }
}

/// Returned by a `MemoryStore` after `quit`.
#[derive(Debug, Error)]
#[error("memory store is closed")]
pub struct StoreClosed;

/// In-process store over a shared `MemoryEngine`.
///
/// Several stores may share one engine, the way several clients share one
/// server; each store has its own open/closed state.
pub struct MemoryStore {
    engine: Arc<MemoryEngine>,
    closed: AtomicBool,
    expirer: Mutex<Option<ExpirationHandle>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store over a fresh engine.
    pub fn new() -> Self {
        Self::with_engine(Arc::new(MemoryEngine::new()))
    }

    /// Creates a store over an existing engine.
    pub fn with_engine(engine: Arc<MemoryEngine>) -> Self {
        MemoryStore {
            engine,
            closed: AtomicBool::new(false),
            expirer: Mutex::new(None),
        }
    }

    /// Creates a store that sweeps expired entries every `interval` until quit.
    pub fn with_expirer(engine: Arc<MemoryEngine>, interval: Duration) -> Self {
        let handle = engine.start_expirer(interval);
        let store = Self::with_engine(engine);
        *store.expirer.lock() = Some(handle);
        store
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Box::new(StoreClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.engine.get(key)?.map(|value| value.to_vec()))
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.ensure_open()?;
        Ok(self.engine.set(key.to_vec(), value.to_vec())?)
    }

    async fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.ensure_open()?;
        Ok(self.engine.set_with_ttl(key.to_vec(), value.to_vec(), ttl)?)
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<u64> {
        self.ensure_open()?;
        Ok(u64::from(self.engine.delete(key)?))
    }

    async fn keys(&self, pattern: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.engine.keys(pattern)?)
    }

    fn quit(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.expirer.lock().take() {
            handle.stop();
        }
    }

    fn status(&self) -> ConnectionStatus {
        if self.closed.load(Ordering::Acquire) {
            ConnectionStatus::Closed
        } else {
            ConnectionStatus::Open
        }
    }
}
