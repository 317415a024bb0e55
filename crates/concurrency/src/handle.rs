//! The public API: begin/insert/update/delete/lookup/commit/abort, plus
//! thread (de)registration and handle lifecycle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tictoc_core::{
    CoreError, DataConfig, IsolationLevel, KvBackend, LexicographicDataConfig, LookupResult,
    Message, TicTocConfig,
};

use crate::cache::TimestampCache;
use crate::commit;
use crate::entry::TransactionContext;
use crate::error::Result as TxnResult;

thread_local! {
    /// Maps this thread's registration with each live `TicTocDb` handle
    /// (by `handle_id`) to the tid it was assigned. A thread may be
    /// registered with more than one handle at once.
    static REGISTERED_TIDS: RefCell<HashMap<u64, u64>> = RefCell::new(HashMap::new());
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(0);

/// Reject any isolation level this build does not implement.
///
/// Shared by `create`/`open` (validating `TicTocConfig::isol_level`) and
/// `set_isolation_level` (validating a later request against the same
/// rule), so the two never drift apart.
fn validate_isol_level(level: IsolationLevel) -> std::result::Result<(), CoreError> {
    match level {
        IsolationLevel::Serializable => Ok(()),
        IsolationLevel::Snapshot => Err(CoreError::UnsupportedIsolationLevel(
            "snapshot isolation requires multi-version history this engine does not keep"
                .to_string(),
        )),
    }
}

/// A transactional handle over a `B`-backed ordered key-value store.
///
/// Generic over the backend: the engine only ever calls through the
/// `KvBackend` trait, so swapping in a different store means swapping
/// the type parameter.
pub struct TicTocDb<B: KvBackend> {
    handle_id: u64,
    backend: B,
    cache: TimestampCache,
    data_config: Arc<dyn DataConfig>,
    lock_retry_backoff: std::time::Duration,
    silo_compatible_commit_ts: bool,
    isol_level: Mutex<IsolationLevel>,
    next_tid: AtomicU64,
}

/// RAII handle returned by [`TicTocDb::register_thread`].
///
/// Deregisters the calling thread from `db` when dropped. Holding this
/// for the scope of a thread's use of the handle is the thread
/// (de)registration safety net: a thread that panics, returns early, or
/// simply forgets the matching `deregister_thread` call still leaves
/// this handle's per-thread state in the backend and the thread-local
/// tid map in a consistent, released state once the guard goes out of
/// scope.
#[must_use = "dropping this immediately deregisters the thread; bind it with `let _guard = ...` for the scope that uses this handle"]
pub struct ThreadGuard<'a, B: KvBackend> {
    db: &'a TicTocDb<B>,
}

impl<'a, B: KvBackend> Drop for ThreadGuard<'a, B> {
    fn drop(&mut self) {
        self.db.deregister_thread();
    }
}

impl<B: KvBackend> TicTocDb<B> {
    fn new_internal(
        backend: B,
        config: &TicTocConfig<B::Config>,
        data_config: Arc<dyn DataConfig>,
    ) -> Self {
        TicTocDb {
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            cache: TimestampCache::new(config.tscache_log_slots, config.cache_mode),
            data_config,
            lock_retry_backoff: config.lock_retry_backoff,
            silo_compatible_commit_ts: config.silo_compatible_commit_ts,
            isol_level: Mutex::new(config.isol_level),
            next_tid: AtomicU64::new(0),
        }
    }

    /// Create a fresh handle, using the default byte-lexicographic
    /// `DataConfig` (last-write-wins merge).
    ///
    /// `config.backend_config` is forwarded verbatim to
    /// `KvBackend::create_or_open`.
    pub fn create(config: TicTocConfig<B::Config>) -> std::result::Result<Self, CoreError> {
        Self::create_with_data_config(config, Arc::new(LexicographicDataConfig))
    }

    /// Like [`Self::create`], with an explicit `DataConfig`.
    pub fn create_with_data_config(
        config: TicTocConfig<B::Config>,
        data_config: Arc<dyn DataConfig>,
    ) -> std::result::Result<Self, CoreError> {
        validate_isol_level(config.isol_level)?;
        let backend = B::create_or_open(config.backend_config.clone(), false)
            .map_err(|e| CoreError::ConfigRejected(e.to_string()))?;
        Ok(Self::new_internal(backend, &config, data_config))
    }

    /// Open a handle against a backend that may already hold data.
    pub fn open(config: TicTocConfig<B::Config>) -> std::result::Result<Self, CoreError> {
        Self::open_with_data_config(config, Arc::new(LexicographicDataConfig))
    }

    /// Like [`Self::open`], with an explicit `DataConfig`.
    pub fn open_with_data_config(
        config: TicTocConfig<B::Config>,
        data_config: Arc<dyn DataConfig>,
    ) -> std::result::Result<Self, CoreError> {
        validate_isol_level(config.isol_level)?;
        let backend = B::create_or_open(config.backend_config.clone(), true)
            .map_err(|e| CoreError::ConfigRejected(e.to_string()))?;
        Ok(Self::new_internal(backend, &config, data_config))
    }

    /// Release the cache and the backend. Consumes the handle.
    pub fn close(self) {
        self.backend.close();
    }

    /// Bind the calling thread to this handle, assigning it a tid.
    ///
    /// Must be called once per thread before any other operation on
    /// this handle from that thread. Returns a [`ThreadGuard`] that
    /// deregisters the thread when dropped — the safety net against a
    /// thread that runs to completion without an explicit
    /// `deregister_thread` call. Bind it (`let _guard = ...`) for the
    /// scope that uses this handle; calling `deregister_thread`
    /// explicitly before the guard drops is also fine, since
    /// deregistration is idempotent.
    pub fn register_thread(&self) -> ThreadGuard<'_, B> {
        REGISTERED_TIDS.with(|m| {
            m.borrow_mut()
                .entry(self.handle_id)
                .or_insert_with(|| self.next_tid.fetch_add(1, Ordering::Relaxed));
        });
        self.backend.register_thread();
        ThreadGuard { db: self }
    }

    /// Release the calling thread's binding to this handle.
    ///
    /// Idempotent: a second call (e.g. from the [`ThreadGuard`] dropping
    /// after an explicit call already ran) is a no-op.
    pub fn deregister_thread(&self) {
        let was_registered =
            REGISTERED_TIDS.with(|m| m.borrow_mut().remove(&self.handle_id).is_some());
        if was_registered {
            self.backend.deregister_thread();
        }
    }

    fn current_tid(&self) -> u64 {
        REGISTERED_TIDS.with(|m| {
            *m.borrow().get(&self.handle_id).unwrap_or_else(|| {
                panic!(
                    "thread not registered with this TicTocDb handle; call register_thread first"
                )
            })
        })
    }

    /// Request a different isolation level.
    ///
    /// This build only supports `SERIALIZABLE`; anything else is
    /// rejected rather than silently downgraded (see `DESIGN.md`).
    pub fn set_isolation_level(
        &self,
        level: IsolationLevel,
    ) -> std::result::Result<(), CoreError> {
        validate_isol_level(level)?;
        *self.isol_level.lock() = level;
        Ok(())
    }

    /// Begin a new, empty transaction.
    pub fn begin(&self) -> TransactionContext {
        TransactionContext::new()
    }

    /// Buffer an INSERT of `key` -> `value`.
    pub fn insert(&self, txn: &mut TransactionContext, key: &[u8], value: &[u8]) -> TxnResult<()> {
        let tid = self.current_tid();
        txn.local_write(
            &self.cache,
            tid,
            key,
            Message::insert(value.to_vec()),
            self.data_config.as_ref(),
        )
    }

    /// Buffer an UPDATE of `key` with `delta`.
    pub fn update(&self, txn: &mut TransactionContext, key: &[u8], delta: &[u8]) -> TxnResult<()> {
        let tid = self.current_tid();
        txn.local_write(
            &self.cache,
            tid,
            key,
            Message::update(delta.to_vec()),
            self.data_config.as_ref(),
        )
    }

    /// Buffer a DELETE of `key`.
    pub fn delete(&self, txn: &mut TransactionContext, key: &[u8]) -> TxnResult<()> {
        let tid = self.current_tid();
        txn.local_write(
            &self.cache,
            tid,
            key,
            Message::delete(),
            self.data_config.as_ref(),
        )
    }

    /// Read `key`, observing this transaction's own buffered writes first.
    pub fn lookup(
        &self,
        txn: &mut TransactionContext,
        key: &[u8],
        out: &mut LookupResult,
    ) -> TxnResult<()> {
        let tid = self.current_tid();
        txn.lookup(&self.cache, &self.backend, tid, key, out)
    }

    /// Commit `txn`. Returns the commit timestamp on success; on
    /// conflict returns `Err(TxnError::Aborted { .. })` and the context
    /// is already torn down.
    pub fn commit(&self, txn: &mut TransactionContext) -> TxnResult<u64> {
        let tid = self.current_tid();
        commit::commit(
            txn,
            &self.cache,
            &self.backend,
            self.data_config.as_ref(),
            tid,
            self.lock_retry_backoff,
            self.silo_compatible_commit_ts,
        )
    }

    /// Discard `txn` without applying any of its buffered writes.
    pub fn abort(&self, txn: &mut TransactionContext) {
        txn.teardown(&self.cache);
    }

    /// Number of live timestamp-cache slots. Diagnostic only.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
