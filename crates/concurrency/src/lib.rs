//! TicToc: multi-key serializable transactions over a pluggable ordered
//! key-value backend.
//!
//! Implements the transactional layer described by the project spec:
//! - [`timestamp`]: the packed, CAS-only Timestamp Word.
//! - [`cache`]: the Timestamp Cache mapping keys to timestamp words.
//! - [`entry`]: RW-Entry bookkeeping and the per-transaction context.
//! - [`commit`]: the TicToc validate-lock-extend-write commit protocol.
//! - [`handle`]: the public `TicTocDb` API (begin/insert/update/delete/
//!   lookup/commit/abort, thread registration).
//!
//! The ordered key-value store itself, its on-disk format, block cache,
//! and WAL are out of scope — this crate only consumes the
//! `tictoc_core::KvBackend` trait boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod commit;
pub mod entry;
pub mod error;
pub mod handle;
pub mod timestamp;

pub use cache::{Slot, TimestampCache};
pub use entry::{RwEntry, TransactionContext, RW_SET_SIZE_LIMIT};
pub use error::{Result, TxnError};
pub use handle::{ThreadGuard, TicTocDb};
pub use timestamp::{Snapshot, TimestampWord};

// Re-export the shared contract types for convenience.
pub use tictoc_core::{
    CacheMode, CoreError, DataConfig, IsolationLevel, KvBackend, LexicographicDataConfig,
    LookupResult, Message, MessageClass, TicTocConfig,
};
