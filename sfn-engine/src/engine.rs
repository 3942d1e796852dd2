//! # Engine Trait
//!
//! Strategy interface implemented by storage backends so callers stay
//! decoupled from a concrete engine.

use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineResult;

/// Synchronous key-value engine with Redis-like string semantics.
pub trait KVEngine: Send + Sync {
    /// Returns the live value for `key`, or `None` if missing or expired.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Arc<[u8]>>>;

    /// Inserts or replaces a value and clears any previous expiry.
    fn set(&self, key: Vec<u8>, value: Vec<u8>) -> EngineResult<()>;

    /// Inserts or replaces a value that expires after `ttl`.
    fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> EngineResult<()>;

    /// Removes `key`. Returns true when a live entry was removed.
    fn delete(&self, key: &[u8]) -> EngineResult<bool>;

    /// Lists live keys matching a Redis-style glob pattern.
    fn keys(&self, pattern: &[u8]) -> EngineResult<Vec<Vec<u8>>>;
}
