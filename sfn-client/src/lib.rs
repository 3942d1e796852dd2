//! # sfn-cache Async Client
//!
//! Purpose: Provide a lightweight, asynchronous Redis-compatible client with
//! connection pooling, used as the default store behind `sfn-cache`.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Lazy Connect**: Building a client never touches the network; the first
//!    command opens the first connection.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod pool;
mod resp;

pub use client::{ClientConfig, ClientError, ClientResult, ConnectionStatus, KVClient};
