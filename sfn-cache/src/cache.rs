//! # Cache Handle
//!
//! Purpose: Store and retrieve JSON-encoded values under a key prefix on a
//! shared store client.
//!
//! ## Design Principles
//! 1. **Thin Facade**: Each operation maps to one store command (or one
//!    enumeration plus deletes for `destroy`); the store does the real work.
//! 2. **Named Constructors**: Each input shape has its own constructor;
//!    `Cache::new` dispatches a `CacheInput` for callers holding any of them.
//! 3. **Counted Sharing**: Handles resolved through a `ConnectionRegistry`
//!    hold one count each; closing a handle never strands its siblings.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sfn_cache::{Cache, ConnectionRegistry};
//!
//! # async fn demo() -> sfn_cache::CacheResult<()> {
//! let registry = Arc::new(ConnectionRegistry::new());
//! let cache = Cache::from_url(&registry, "redis://127.0.0.1:6379?prefix=app:")?;
//! cache.set("a", vec![1, 2, 3], Some(Duration::from_secs(10))).await?;
//! let value: Option<Vec<i32>> = cache.get("a").await?;
//! assert_eq!(value, Some(vec![1, 2, 3]));
//! cache.close();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sfn_client::ConnectionStatus;
use sfn_engine::glob;
use tracing::debug;

use crate::descriptor::{ConnectionSettings, DEFAULT_PREFIX};
use crate::error::{CacheError, CacheResult};
use crate::options::CacheOptions;
use crate::registry::ConnectionRegistry;
use crate::store::KvStore;

/// The input shapes a cache handle can be built from.
pub enum CacheInput {
    /// Default host, port, and prefix.
    Default,
    /// A `redis://` connection string.
    Url(String),
    /// Structured options.
    Options(CacheOptions),
    /// An already built client, adopted as-is.
    Client(Arc<dyn KvStore>),
}

/// A prefix-namespaced JSON cache over a store client.
pub struct Cache {
    dsn: Option<String>,
    prefix: String,
    client: Arc<dyn KvStore>,
    registry: Option<Arc<ConnectionRegistry>>,
    closed: AtomicBool,
}

impl Cache {
    /// Builds a handle from any supported input shape.
    pub fn new(registry: &Arc<ConnectionRegistry>, input: CacheInput) -> CacheResult<Self> {
        match input {
            CacheInput::Default => Self::connect_default(registry),
            CacheInput::Url(url) => Self::from_url(registry, &url),
            CacheInput::Options(options) => Self::from_options(registry, options),
            CacheInput::Client(client) => Ok(Self::from_client(client)),
        }
    }

    /// Connects to `127.0.0.1:6379` with prefix `sfn-cache:`.
    pub fn connect_default(registry: &Arc<ConnectionRegistry>) -> CacheResult<Self> {
        Self::from_options(registry, CacheOptions::default())
    }

    /// Parses a `redis://[:password@]host[:port][/db][?prefix=..]` URL and
    /// connects through the registry.
    pub fn from_url(registry: &Arc<ConnectionRegistry>, url: &str) -> CacheResult<Self> {
        Self::from_options(registry, CacheOptions::from_url(url)?)
    }

    /// Resolves `options`, then reuses or creates the registry's client for
    /// the resulting descriptor.
    pub fn from_options(registry: &Arc<ConnectionRegistry>, options: CacheOptions) -> CacheResult<Self> {
        let settings = ConnectionSettings::resolve(options);
        let dsn = settings.dsn();
        let client = registry.acquire(&dsn, &settings)?;

        Ok(Cache {
            dsn: Some(dsn),
            prefix: settings.prefix,
            client,
            registry: Some(Arc::clone(registry)),
            closed: AtomicBool::new(false),
        })
    }

    /// Adopts an existing client. The handle has no descriptor and uses the
    /// default prefix; `close` quits the client directly.
    pub fn from_client(client: Arc<dyn KvStore>) -> Self {
        Cache {
            dsn: None,
            prefix: DEFAULT_PREFIX.to_string(),
            client,
            registry: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Prefix prepended to every key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replaces the prefix for later operations; stored keys are not moved.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// Canonical descriptor, absent for adopted clients.
    pub fn dsn(&self) -> Option<&str> {
        self.dsn.as_deref()
    }

    /// Underlying store client, possibly shared with other handles.
    pub fn client(&self) -> &Arc<dyn KvStore> {
        &self.client
    }

    /// `Closed` once this handle is closed, otherwise the client's state.
    pub fn status(&self) -> ConnectionStatus {
        if self.closed.load(Ordering::Acquire) {
            ConnectionStatus::Closed
        } else {
            self.client.status()
        }
    }

    /// True unless the status is `Open`.
    pub fn is_closed(&self) -> bool {
        self.status() != ConnectionStatus::Open
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    /// Stores `value` as JSON, expiring after `ttl` when it is non-zero.
    ///
    /// Returns the value back on success. A value that encodes to JSON `null`
    /// is not written and yields `Ok(None)`.
    pub async fn set<T: Serialize>(&self, key: &str, value: T, ttl: Option<Duration>) -> CacheResult<Option<T>> {
        self.ensure_open()?;
        let key = self.key_for(key);
        let encoded = serde_json::to_vec(&value).map_err(|source| CacheError::Encode {
            key: key.clone(),
            source,
        })?;
        if encoded == b"null" {
            debug!(key = %key, "value has no representation, skipping write");
            return Ok(None);
        }

        let written = match ttl.filter(|ttl| !ttl.is_zero()) {
            Some(ttl) => self.client.set_with_ttl(key.as_bytes(), &encoded, ttl).await,
            None => self.client.set(key.as_bytes(), &encoded).await,
        };
        written.map_err(|source| CacheError::Store { op: "set", key, source })?;
        Ok(Some(value))
    }

    /// Reads and decodes the value under `key`; `None` when there is none.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.ensure_open()?;
        let key = self.key_for(key);
        let data = match self.client.get(key.as_bytes()).await {
            Ok(Some(data)) if !data.is_empty() => data,
            Ok(_) => return Ok(None),
            Err(source) => return Err(CacheError::Store { op: "get", key, source }),
        };

        let decoded = serde_json::from_slice::<Value>(&data)
            .and_then(|value| match value {
                Value::Null => Ok(None),
                value => serde_json::from_value(value).map(Some),
            });
        decoded.map_err(|source| CacheError::Decode { key, source })
    }

    /// Removes `key`. Missing keys are not an error.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        let key = self.key_for(key);
        match self.client.delete(key.as_bytes()).await {
            Ok(_) => Ok(()),
            Err(source) => Err(CacheError::Store { op: "delete", key, source }),
        }
    }

    /// Deletes every key under this handle's prefix, one at a time, and
    /// returns how many were removed. Closes the handle afterwards when
    /// `close` is set.
    ///
    /// The first failed delete aborts the sweep; keys not reached yet stay.
    pub async fn destroy(&self, close: bool) -> CacheResult<usize> {
        self.ensure_open()?;
        let mut pattern = glob::escape(self.prefix.as_bytes());
        pattern.push(b'*');

        let keys = self.client.keys(&pattern).await.map_err(|source| CacheError::Store {
            op: "keys",
            key: String::from_utf8_lossy(&pattern).into_owned(),
            source,
        })?;

        for key in &keys {
            if let Err(source) = self.client.delete(key).await {
                return Err(CacheError::Store {
                    op: "delete",
                    key: String::from_utf8_lossy(key).into_owned(),
                    source,
                });
            }
        }
        debug!(prefix = %self.prefix, removed = keys.len(), "destroyed cache namespace");

        if close {
            self.close();
        }
        Ok(keys.len())
    }

    /// Closes the handle without waiting.
    ///
    /// Shared clients are quit once their last handle closes; an adopted
    /// client is quit immediately. Calling `close` again does nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match (&self.registry, &self.dsn) {
            (Some(registry), Some(dsn)) => {
                registry.release(dsn);
            }
            _ => {
                debug!("quitting adopted client");
                self.client.quit();
            }
        }
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn key_for(&self, key: &str) -> String {
        let mut prefixed = String::with_capacity(self.prefix.len() + key.len());
        prefixed.push_str(&self.prefix);
        prefixed.push_str(key);
        prefixed
    }
}

impl Drop for Cache {
    // Adopted clients belong to the caller and are left running.
    fn drop(&mut self) {
        if *self.closed.get_mut() {
            return;
        }
        if let (Some(registry), Some(dsn)) = (&self.registry, &self.dsn) {
            registry.release(dsn);
        }
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("prefix", &self.prefix)
            .field("shared", &self.registry.is_some())
            .field("status", &self.status())
            .finish()
    }
}
