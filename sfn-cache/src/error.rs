use thiserror::Error;

use crate::store::StoreError;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by a cache handle.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The connection string could not be parsed.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),

    /// A constructor option had an unusable value.
    #[error("invalid cache options: {0}")]
    InvalidOptions(String),

    /// The value could not be serialized to JSON.
    #[error("failed to encode value for key `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored content is not valid JSON for the requested type.
    #[error("failed to decode value stored at `{key}`")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The underlying store reported a failure.
    #[error("store {op} failed for `{key}`")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    /// The handle was closed with `close` or `destroy(true)`.
    #[error("cache handle is closed")]
    Closed,
}
