//! Errors produced by the commit engine and the transaction public API.
//!
//! Transaction abort is a distinguished, expected outcome: the client
//! discards the txn and may retry. Read-path backend errors are
//! surfaced without auto-aborting. Protocol invariant violations are
//! treated as fatal and asserted rather than returned as a recoverable
//! `Err` (see the `debug_assert!`/`assert!` calls in `crate::timestamp`
//! and `crate::commit`).

use std::error::Error as StdError;
use thiserror::Error;

/// Result type alias for transaction operations.
pub type Result<T> = std::result::Result<T, TxnError>;

/// Errors a transaction operation can return.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Commit validation detected a conflict; the transaction was
    /// rolled back and its context torn down. The caller may begin a
    /// fresh transaction and retry.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Human-readable reason for the abort.
        reason: String,
    },

    /// The transaction's read/write set reached `RW_SET_SIZE_LIMIT`.
    #[error("read/write set size limit ({limit}) exceeded")]
    ReadWriteSetFull {
        /// The configured limit that was hit.
        limit: usize,
    },

    /// The backend returned an error on a read-path call (`lookup`).
    ///
    /// This does not auto-abort the transaction; the caller decides
    /// whether to proceed or abort explicitly.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
}

impl TxnError {
    /// Wrap a backend error for the read path.
    pub fn backend<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        TxnError::Backend(Box::new(err))
    }

    /// Construct an aborted-transaction error with the given reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        TxnError::Aborted {
            reason: reason.into(),
        }
    }
}
