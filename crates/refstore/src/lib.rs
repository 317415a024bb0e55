//! A minimal in-process ordered key-value store implementing
//! `tictoc_core::KvBackend`.
//!
//! This is explicitly NOT the production backend the top-level spec
//! excludes from scope: no on-disk format, no block cache, no WAL, no
//! admission control. It exists so `tictoc-concurrency` is exercisable
//! end-to-end in tests and doctests, and as a minimal worked example of
//! the adapter contract in `tictoc_core::backend`.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use tictoc_core::{KvBackend, LookupResult};

/// Configuration for [`RefStore`].
///
/// There is nothing to configure yet — the store is purely in-memory —
/// but the type exists so `RefStore` has a concrete, `Clone` `Config`
/// to satisfy `KvBackend::Config`, matching how a real backend would
/// thread its own config type through `TicTocConfig::backend_config`.
#[derive(Debug, Clone, Default)]
pub struct RefStoreConfig;

/// Errors a [`RefStore`] can return.
///
/// The in-memory map can't actually fail; this variant exists so the
/// trait's `Error` associated type has something concrete to name, and
/// so callers of `KvBackend::create_or_open` exercise the same error
/// path a real backend's IO errors would take.
#[derive(Debug, Error)]
pub enum RefStoreError {
    /// `open_existing` was requested but this store has no persisted
    /// state to resume from (it is purely in-memory).
    #[error("cannot open an existing RefStore: it has no persisted state")]
    NothingToOpen,
}

/// A `BTreeMap` + `parking_lot::RwLock` ordered key-value store.
pub struct RefStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    registered_threads: AtomicI64,
}

impl RefStore {
    /// Number of threads currently registered. Diagnostic only.
    pub fn registered_thread_count(&self) -> i64 {
        self.registered_threads.load(Ordering::Acquire)
    }

    /// Number of keys currently stored. Diagnostic only.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether the store currently holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvBackend for RefStore {
    type Config = RefStoreConfig;
    type Error = RefStoreError;

    fn create_or_open(
        _config: Self::Config,
        open_existing: bool,
    ) -> std::result::Result<Self, Self::Error> {
        if open_existing {
            return Err(RefStoreError::NothingToOpen);
        }
        Ok(RefStore {
            map: RwLock::new(BTreeMap::new()),
            registered_threads: AtomicI64::new(0),
        })
    }

    fn close(self) {}

    fn register_thread(&self) {
        self.registered_threads.fetch_add(1, Ordering::AcqRel);
    }

    fn deregister_thread(&self) {
        self.registered_threads.fetch_sub(1, Ordering::AcqRel);
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), Self::Error> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn update(&self, key: &[u8], delta_value: &[u8]) -> std::result::Result<(), Self::Error> {
        // The engine already merged the delta onto the prior buffered
        // value via `DataConfig::merge` before this call; the backend
        // just needs to durably store the resulting bytes.
        self.map.write().insert(key.to_vec(), delta_value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> std::result::Result<(), Self::Error> {
        self.map.write().remove(key);
        Ok(())
    }

    fn lookup(
        &self,
        key: &[u8],
        result: &mut LookupResult,
    ) -> std::result::Result<(), Self::Error> {
        match self.map.read().get(key) {
            Some(value) => result.set_found(value),
            None => result.clear(),
        }
        Ok(())
    }
}
