//! # Connection Registry
//!
//! Purpose: Let cache handles built from equivalent connection parameters
//! share one store client instead of opening redundant connections.
//!
//! ## Design Principles
//! 1. **Explicit Ownership**: The registry is a value the caller creates and
//!    passes in, not a process global; tests build their own.
//! 2. **Reference Counting**: Each handle holds one count on its entry; the
//!    client is quit only when the last handle lets go.
//! 3. **Pluggable Connector**: Building a client for a new descriptor goes
//!    through a `Connector`, so the backend can be swapped.
//! 4. **Short Critical Sections**: The map lock is never held across `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use sfn_client::{ClientConfig, ConnectionStatus, KVClient};
use sfn_engine::MemoryEngine;
use tracing::{debug, warn};

use crate::descriptor::ConnectionSettings;
use crate::error::{CacheError, CacheResult};
use crate::store::{KvStore, MemoryStore};

/// Builds a store client for resolved connection settings.
pub trait Connector: Send + Sync {
    fn connect(&self, settings: &ConnectionSettings) -> CacheResult<Arc<dyn KvStore>>;
}

/// Connects to a Redis-compatible server over RESP2.
///
/// Recognized passthrough options: `max_idle`, `max_total`,
/// `connect_timeout_ms`, `read_timeout_ms`, `write_timeout_ms`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespConnector;

impl Connector for RespConnector {
    fn connect(&self, settings: &ConnectionSettings) -> CacheResult<Arc<dyn KvStore>> {
        let config = client_config(settings)?;
        debug!(server = %settings.server_key(), max_total = config.max_total, "creating RESP client");
        Ok(Arc::new(KVClient::with_config(config)))
    }
}

fn client_config(settings: &ConnectionSettings) -> CacheResult<ClientConfig> {
    let mut config = ClientConfig {
        addr: settings.addr(),
        password: settings.password.clone(),
        db: settings.db,
        ..ClientConfig::default()
    };

    for (name, value) in &settings.passthrough {
        match name.as_str() {
            "max_idle" => config.max_idle = passthrough_u64(name, value)? as usize,
            "max_total" => config.max_total = passthrough_u64(name, value)? as usize,
            "connect_timeout_ms" => {
                config.connect_timeout = Some(Duration::from_millis(passthrough_u64(name, value)?))
            }
            "read_timeout_ms" => {
                config.read_timeout = Some(Duration::from_millis(passthrough_u64(name, value)?))
            }
            "write_timeout_ms" => {
                config.write_timeout = Some(Duration::from_millis(passthrough_u64(name, value)?))
            }
            _ => warn!(option = %name, "ignoring unrecognized client option"),
        }
    }

    if config.max_total == 0 {
        return Err(CacheError::InvalidOptions("`max_total` must be at least 1".to_string()));
    }
    Ok(config)
}

fn passthrough_u64(name: &str, value: &Value) -> CacheResult<u64> {
    let parsed = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        CacheError::InvalidOptions(format!("`{name}` must be a non-negative integer, got {value}"))
    })
}

/// Connects to in-process engines, one per server address and database.
///
/// Two connections to the same `host:port/db` see the same data, like two
/// clients of one server.
#[derive(Default)]
pub struct MemoryConnector {
    servers: Mutex<HashMap<String, Arc<MemoryEngine>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine serving `server_key`, if any connection was made to it.
    pub fn engine(&self, server_key: &str) -> Option<Arc<MemoryEngine>> {
        self.servers.lock().get(server_key).cloned()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, settings: &ConnectionSettings) -> CacheResult<Arc<dyn KvStore>> {
        let server = settings.server_key();
        let engine = Arc::clone(
            self.servers
                .lock()
                .entry(server.clone())
                .or_insert_with(|| Arc::new(MemoryEngine::new())),
        );
        debug!(server = %server, "creating memory store");
        Ok(Arc::new(MemoryStore::with_engine(engine)))
    }
}

struct RegistryEntry {
    client: Arc<dyn KvStore>,
    handles: usize,
    server: String,
}

/// Descriptor → shared client, with a handle count per entry.
pub struct ConnectionRegistry {
    connector: Box<dyn Connector>,
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Registry that connects over RESP2.
    pub fn new() -> Self {
        Self::with_connector(RespConnector)
    }

    /// Registry that builds clients through `connector`.
    pub fn with_connector(connector: impl Connector + 'static) -> Self {
        ConnectionRegistry {
            connector: Box::new(connector),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared client for `dsn`, creating it on first use.
    ///
    /// Every successful call must be paired with one `release`.
    pub(crate) fn acquire(&self, dsn: &str, settings: &ConnectionSettings) -> CacheResult<Arc<dyn KvStore>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(dsn) {
            if entry.client.status() != ConnectionStatus::Open {
                debug!(server = %entry.server, "replacing closing or closed client");
                entry.client = self.connector.connect(settings)?;
            }
            entry.handles += 1;
            debug!(server = %entry.server, handles = entry.handles, "reusing client");
            return Ok(Arc::clone(&entry.client));
        }

        let client = self.connector.connect(settings)?;
        entries.insert(
            dsn.to_string(),
            RegistryEntry {
                client: Arc::clone(&client),
                handles: 1,
                server: settings.server_key(),
            },
        );
        Ok(client)
    }

    /// Drops one handle's claim on `dsn`; the last one quits the client.
    ///
    /// Returns true when the client was quit.
    pub(crate) fn release(&self, dsn: &str) -> bool {
        let mut entries = self.entries.lock();
        let remaining = match entries.get_mut(dsn) {
            Some(entry) => {
                entry.handles = entry.handles.saturating_sub(1);
                entry.handles
            }
            None => return false,
        };
        if remaining > 0 {
            return false;
        }

        let entry = match entries.remove(dsn) {
            Some(entry) => entry,
            None => return false,
        };
        drop(entries);

        debug!(server = %entry.server, "last handle released, quitting client");
        entry.client.quit();
        true
    }

    pub fn contains(&self, dsn: &str) -> bool {
        self.entries.lock().contains_key(dsn)
    }

    /// Number of open handles sharing the client for `dsn`.
    pub fn handle_count(&self, dsn: &str) -> usize {
        self.entries.lock().get(dsn).map_or(0, |entry| entry.handles)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CacheOptions;
    use serde_json::json;

    fn settings(options: CacheOptions) -> ConnectionSettings {
        ConnectionSettings::resolve(options)
    }

    #[test]
    fn registry_counts_handles_and_quits_last() {
        let registry = ConnectionRegistry::with_connector(MemoryConnector::new());
        let resolved = settings(CacheOptions::default());
        let dsn = resolved.dsn();

        let first = registry.acquire(&dsn, &resolved).unwrap();
        let second = registry.acquire(&dsn, &resolved).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.handle_count(&dsn), 2);

        assert!(!registry.release(&dsn));
        assert_eq!(first.status(), ConnectionStatus::Open);
        assert!(registry.release(&dsn));
        assert_eq!(first.status(), ConnectionStatus::Closed);
        assert!(!registry.contains(&dsn));
        assert!(registry.is_empty());
        assert!(!registry.release(&dsn));
    }

    #[test]
    fn registry_replaces_externally_closed_client() {
        let registry = ConnectionRegistry::with_connector(MemoryConnector::new());
        let resolved = settings(CacheOptions::default());
        let dsn = resolved.dsn();

        let first = registry.acquire(&dsn, &resolved).unwrap();
        first.quit();
        let second = registry.acquire(&dsn, &resolved).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.status(), ConnectionStatus::Open);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn registry_replaces_client_that_is_still_closing() {
        let registry = ConnectionRegistry::new();
        let resolved = settings(CacheOptions::default());
        let dsn = resolved.dsn();

        // Inside a runtime, quit leaves the client Closing until its
        // background task runs.
        let first = registry.acquire(&dsn, &resolved).unwrap();
        first.quit();
        assert_eq!(first.status(), ConnectionStatus::Closing);

        let second = registry.acquire(&dsn, &resolved).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.status(), ConnectionStatus::Open);
        assert_eq!(registry.handle_count(&dsn), 2);
    }

    #[test]
    fn memory_connector_shares_engine_per_server() {
        let connector = MemoryConnector::new();
        let a = settings(CacheOptions {
            prefix: Some("a:".to_string()),
            ..CacheOptions::default()
        });
        let b = settings(CacheOptions {
            prefix: Some("b:".to_string()),
            ..CacheOptions::default()
        });
        connector.connect(&a).unwrap();
        connector.connect(&b).unwrap();
        assert_eq!(connector.servers.lock().len(), 1);
        assert!(connector.engine("127.0.0.1:6379").is_some());
    }

    #[test]
    fn client_config_maps_passthrough_options() {
        let mut passthrough = serde_json::Map::new();
        passthrough.insert("max_total".to_string(), json!(4));
        passthrough.insert("connect_timeout_ms".to_string(), json!("250"));
        passthrough.insert("no_ready_check".to_string(), json!(true));
        let resolved = settings(CacheOptions {
            password: Some("pw".to_string()),
            db: Some(1),
            passthrough,
            ..CacheOptions::default()
        });

        let config = client_config(&resolved).unwrap();
        assert_eq!(config.addr, "127.0.0.1:6379");
        assert_eq!(config.max_total, 4);
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.db, Some(1));
    }

    #[test]
    fn client_config_rejects_malformed_values() {
        let mut passthrough = serde_json::Map::new();
        passthrough.insert("max_idle".to_string(), json!("many"));
        let resolved = settings(CacheOptions {
            passthrough,
            ..CacheOptions::default()
        });
        assert!(matches!(client_config(&resolved), Err(CacheError::InvalidOptions(_))));
    }
}
