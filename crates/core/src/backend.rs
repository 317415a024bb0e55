//! The KV Backend Adapter contract (spec Section 4.7).
//!
//! The ordered key-value store itself is out of scope for this crate —
//! its on-disk format, block cache, and WAL are external collaborators.
//! What we own is the thin trait a backend must implement so the commit
//! engine in `tictoc-concurrency` can drive it.

use std::error::Error as StdError;
use std::fmt;

/// The kind of buffered write an RW-Entry carries.
///
/// INSERT and DELETE are *definitive*: they replace any prior buffered
/// message outright. UPDATE merges onto an existing UPDATE or INSERT via
/// [`DataConfig::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// Insert a new value, overwriting anything previously buffered.
    Insert,
    /// Apply a delta to the existing value via the data config's merge function.
    Update,
    /// Remove the key, overwriting anything previously buffered.
    Delete,
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageClass::Insert => "INSERT",
            MessageClass::Update => "UPDATE",
            MessageClass::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A buffered write for one key within a transaction.
///
/// `value` is empty for `DELETE`; for `INSERT`/`UPDATE` it holds the
/// (possibly merged) payload to apply at commit time.
#[derive(Debug, Clone)]
pub struct Message {
    /// Which kind of write this is.
    pub class: MessageClass,
    /// The payload to apply. Unused (and left empty) for `DELETE`.
    pub value: Vec<u8>,
}

impl Message {
    /// Construct an INSERT message.
    pub fn insert(value: Vec<u8>) -> Self {
        Message {
            class: MessageClass::Insert,
            value,
        }
    }

    /// Construct an UPDATE message carrying a delta to merge.
    pub fn update(delta: Vec<u8>) -> Self {
        Message {
            class: MessageClass::Update,
            value: delta,
        }
    }

    /// Construct a DELETE message.
    pub fn delete() -> Self {
        Message {
            class: MessageClass::Delete,
            value: Vec::new(),
        }
    }

    /// True for INSERT and DELETE: messages that replace rather than merge.
    pub fn is_definitive(&self) -> bool {
        matches!(self.class, MessageClass::Insert | MessageClass::Delete)
    }
}

/// Reusable output buffer for [`KvBackend::lookup`].
///
/// Callers pass one of these by mutable reference across repeated
/// lookups (e.g. the TicToc consistent-read retry loop in
/// `TransactionContext::lookup`) so a successful call that turns out to
/// race a concurrent writer doesn't need a fresh allocation on retry.
#[derive(Debug, Clone, Default)]
pub struct LookupResult {
    /// Whether the key was found.
    pub found: bool,
    /// The value found, valid only when `found` is true.
    pub value: Vec<u8>,
}

impl LookupResult {
    /// An empty, not-found result.
    pub fn new() -> Self {
        LookupResult::default()
    }

    /// Reset to the not-found state, retaining the buffer's capacity.
    pub fn clear(&mut self) {
        self.found = false;
        self.value.clear();
    }

    /// Populate with a found value, reusing the existing allocation.
    pub fn set_found(&mut self, value: &[u8]) {
        self.found = true;
        self.value.clear();
        self.value.extend_from_slice(value);
    }
}

/// The contract the commit engine requires from an ordered key-value store.
///
/// Per spec Section 4.7: point-lookup consistency (latest committed value
/// wins) with no transactional guarantees of its own — all multi-key
/// atomicity is provided by the engine that drives this trait.
///
/// Implementations must be safe to share across threads: once a backend
/// is created, every other entry point is called concurrently from
/// however many threads are registered.
pub trait KvBackend: Send + Sync + Sized {
    /// Configuration accepted by [`KvBackend::create_or_open`].
    type Config: Clone;

    /// Backend-specific error type, surfaced verbatim by the engine.
    type Error: StdError + Send + Sync + 'static;

    /// Create a new backend instance, or open an existing one.
    ///
    /// When `open_existing` is true the backend must attempt to resume
    /// from whatever persisted state it owns (out of scope here — that
    /// detail belongs to the backend); when false it starts empty.
    fn create_or_open(
        config: Self::Config,
        open_existing: bool,
    ) -> std::result::Result<Self, Self::Error>;

    /// Release all resources held by this backend.
    fn close(self);

    /// Bind the calling thread to this backend's per-thread state.
    ///
    /// Must be called once per thread before that thread issues any
    /// other call against this backend.
    fn register_thread(&self);

    /// Release the calling thread's per-thread state.
    fn deregister_thread(&self);

    /// Insert `key` with `value`, overwriting any existing value.
    fn insert(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), Self::Error>;

    /// Apply `delta_value` to the value stored at `key`.
    ///
    /// What "apply" means is backend-defined; the engine only guarantees
    /// this is called with whatever payload `DataConfig::merge` produced.
    fn update(&self, key: &[u8], delta_value: &[u8]) -> std::result::Result<(), Self::Error>;

    /// Remove `key`.
    fn delete(&self, key: &[u8]) -> std::result::Result<(), Self::Error>;

    /// Point-lookup `key`, writing the result into the reusable `result` buffer.
    fn lookup(
        &self,
        key: &[u8],
        result: &mut LookupResult,
    ) -> std::result::Result<(), Self::Error>;
}
