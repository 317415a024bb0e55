//! Error types shared across the tictoc workspace.
//!
//! Configuration errors are surfaced verbatim from the backend's
//! `create`/`open`. Transaction-abort and fatal-invariant errors live
//! in `tictoc-concurrency` since they are specific to the engine, not
//! the backend contract.

use thiserror::Error;

/// Result type alias for operations in this crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced while establishing a handle to the transactional layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The backend rejected the supplied configuration.
    ///
    /// Propagated verbatim from `KvBackend::create_or_open`.
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    /// The requested isolation level is not supported by this build.
    ///
    /// This implementation only supports `SERIALIZABLE` and rejects any
    /// other value at construction rather than silently downgrading it.
    #[error("unsupported isolation level: {0}")]
    UnsupportedIsolationLevel(String),
}
