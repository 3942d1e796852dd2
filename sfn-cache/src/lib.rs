//! # sfn-cache
//!
//! Purpose: A small convenience layer over a Redis-compatible key-value store.
//! Keys are namespaced with a prefix, values are stored as JSON, and handles
//! built from equivalent connection parameters share one client.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Cache` is a thin wrapper; storage semantics belong
//!    to the `KvStore` behind it.
//! 2. **Explicit Sharing**: A caller-owned `ConnectionRegistry` deduplicates
//!    clients by canonical descriptor and reference-counts them.
//! 3. **Swappable Backends**: `RespConnector` talks RESP2 to a server;
//!    `MemoryConnector` serves from in-process engines.

mod cache;
mod descriptor;
mod error;
mod options;
mod registry;
mod store;

pub use cache::{Cache, CacheInput};
pub use descriptor::{ConnectionSettings, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_PREFIX};
pub use error::{CacheError, CacheResult};
pub use options::CacheOptions;
pub use registry::{ConnectionRegistry, Connector, MemoryConnector, RespConnector};
pub use sfn_client::ConnectionStatus;
pub use store::{KvStore, MemoryStore, StoreClosed, StoreError, StoreResult};
