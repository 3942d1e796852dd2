//! # sfn-cache In-Process Engine
//!
//! A sharded, TTL-aware key-value engine speaking the same key semantics as a
//! Redis server (millisecond expiry, glob key enumeration). It backs the
//! in-memory store of `sfn-cache` for embedded use and tests.

mod engine;
mod error;
pub mod glob;
mod memory;

pub use engine::KVEngine;
pub use error::{EngineError, EngineResult};
pub use memory::{ExpirationHandle, MemoryEngine};
