use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by storage engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A write would push the engine past its byte budget.
    #[error("out of memory: write of {requested} bytes exceeds limit of {limit} bytes ({used} in use)")]
    OutOfMemory {
        requested: usize,
        used: usize,
        limit: usize,
    },
}
