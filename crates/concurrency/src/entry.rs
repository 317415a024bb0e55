//! RW-Entry and Transaction Context.
//!
//! `TransactionContext` is private to the thread that owns it: nothing
//! here is `Sync`, and the public API in `crate::handle` never shares a
//! `&TransactionContext` across threads.

use std::sync::Arc;

use tictoc_core::{CacheMode, DataConfig, KvBackend, LookupResult, Message, MessageClass};

use crate::cache::{Slot, TimestampCache};
use crate::error::{Result, TxnError};

/// Hard cap on the number of distinct keys one transaction may touch.
///
/// Chosen generously for an in-process OCC transaction; exceeding it
/// is a caller error, not a protocol one.
pub const RW_SET_SIZE_LIMIT: usize = 4096;

/// One key's worth of per-transaction state.
///
/// An entry is created on first touch of a key within a transaction and
/// lives until the transaction commits or aborts, at which point its
/// cache slot reference is released.
#[derive(Debug)]
pub struct RwEntry {
    /// The key this entry tracks.
    pub key: Vec<u8>,
    /// Buffered write, if any. `None` means this entry is read-only so far.
    pub msg: Option<Message>,
    /// Write timestamp observed the last time this entry's slot was read.
    pub wts: u64,
    /// Read timestamp observed the last time this entry's slot was read.
    pub rts: u64,
    /// The cache slot bound to this key, once bound.
    ///
    /// Bound eagerly for reads and for UPDATE/DELETE writes (they carry
    /// a read dependency that commit-time validation must check); a
    /// pure INSERT binds lazily during the commit engine's lock phase.
    ///
    /// Holding `Some(_)` here is itself the reference-counted claim on
    /// the slot: a weak borrow of a Timestamp Cache slot via refcount.
    /// Rust's ownership model makes a pair of separate
    /// keep-the-key/decrement-the-refcount bookkeeping flags redundant,
    /// since an owned `Vec<u8>` key and an `Option<Arc<Slot>>` already
    /// encode exactly that state (see `DESIGN.md`).
    pub tuple_ts: Option<Arc<Slot>>,
    /// Whether this key has been read by this transaction.
    pub is_read: bool,
}

impl RwEntry {
    fn new(key: Vec<u8>) -> Self {
        RwEntry {
            key,
            msg: None,
            wts: 0,
            rts: 0,
            tuple_ts: None,
            is_read: false,
        }
    }
}

/// Merge an incoming message into an entry's buffered message.
fn set_msg(entry: &mut RwEntry, incoming: Message, data_config: &dyn DataConfig) {
    match entry.msg.take() {
        None => entry.msg = Some(incoming),
        Some(existing) => {
            if incoming.is_definitive() {
                entry.msg = Some(incoming);
            } else {
                debug_assert!(
                    !matches!(existing.class, MessageClass::Delete),
                    "merging UPDATE onto a buffered DELETE violates the RW-Entry invariant"
                );
                let merged_value = data_config.merge(&entry.key, &existing.value, &incoming.value);
                // The merged message keeps the *existing* class: merging an
                // UPDATE onto a buffered INSERT must still apply as an
                // INSERT at commit time, since the backend has no prior
                // value to apply a delta against.
                entry.msg = Some(Message {
                    class: existing.class,
                    value: merged_value,
                });
            }
        }
    }
}

/// Ordered, per-transaction list of [`RwEntry`] records.
///
/// Deduplicated on key: at most one entry exists per distinct key.
pub struct TransactionContext {
    pub(crate) entries: Vec<RwEntry>,
}

impl TransactionContext {
    /// A freshly begun, empty transaction.
    pub fn new() -> Self {
        TransactionContext {
            entries: Vec::new(),
        }
    }

    /// Number of distinct keys touched so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key has been touched yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find or create the entry for `key`, OR-ing `is_read` into its flag.
    ///
    /// A linear scan, since read/write sets are typically tiny.
    fn get_or_create(&mut self, key: &[u8], is_read: bool) -> Result<usize> {
        if let Some(idx) = self.entries.iter().position(|e| e.key == key) {
            self.entries[idx].is_read |= is_read;
            return Ok(idx);
        }
        if self.entries.len() >= RW_SET_SIZE_LIMIT {
            return Err(TxnError::ReadWriteSetFull {
                limit: RW_SET_SIZE_LIMIT,
            });
        }
        let mut entry = RwEntry::new(key.to_vec());
        entry.is_read = is_read;
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// The TicToc consistent read.
    ///
    /// Materializes `out` from this transaction's own buffered write if
    /// one exists for `key` (read-your-own-writes), otherwise consults
    /// the backend, double-checking the timestamp word hasn't changed
    /// (and isn't mid-commit) across the read.
    pub fn lookup<B: KvBackend>(
        &mut self,
        cache: &TimestampCache,
        backend: &B,
        tid: u64,
        key: &[u8],
        out: &mut LookupResult,
    ) -> Result<()> {
        let idx = self.get_or_create(key, true)?;
        if self.entries[idx].tuple_ts.is_none() {
            self.entries[idx].tuple_ts = Some(cache.bind(key, tid));
        }
        let slot = Arc::clone(self.entries[idx].tuple_ts.as_ref().unwrap());

        loop {
            let v1 = slot.word.load();
            match &self.entries[idx].msg {
                Some(msg) => materialize(msg, out),
                None => backend.lookup(key, out).map_err(TxnError::backend)?,
            }
            let v2 = slot.word.load();
            if v1 == v2 && !v1.lock_bit {
                self.entries[idx].wts = v1.wts;
                self.entries[idx].rts = v1.rts();
                return Ok(());
            }
            // Either the word changed under us, or it's mid-commit by
            // another transaction: retry the read.
        }
    }

    /// Buffer a write locally. Never touches the backend.
    pub fn local_write(
        &mut self,
        cache: &TimestampCache,
        tid: u64,
        key: &[u8],
        msg: Message,
        data_config: &dyn DataConfig,
    ) -> Result<()> {
        let idx = self.get_or_create(key, false)?;
        let needs_read_dependency = matches!(msg.class, MessageClass::Update | MessageClass::Delete);
        if needs_read_dependency && self.entries[idx].tuple_ts.is_none() {
            let slot = cache.bind(key, tid);
            let snapshot = slot.word.load();
            self.entries[idx].wts = snapshot.wts;
            self.entries[idx].rts = snapshot.rts();
            self.entries[idx].tuple_ts = Some(slot);
        }
        set_msg(&mut self.entries[idx], msg, data_config);
        Ok(())
    }

    /// Release every bound cache slot and discard all buffered state.
    ///
    /// Called by the commit engine on both the commit and abort paths,
    /// and directly by `abort`.
    ///
    /// `cache.bind` only took a counted reference (via `insert_and_get`)
    /// when the cache is in `Ephemeral` mode; in `RetainAll` mode it
    /// bound slots via `insert_and_get_no_ref`, so there is no reference
    /// here to release — calling `get_and_remove` anyway would underflow
    /// the refcount that was never incremented.
    pub fn teardown(&mut self, cache: &TimestampCache) {
        let holds_refs = cache.mode() == CacheMode::Ephemeral;
        for entry in self.entries.drain(..) {
            if holds_refs && entry.tuple_ts.is_some() {
                cache.get_and_remove(&entry.key);
            }
        }
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        TransactionContext::new()
    }
}

fn materialize(msg: &Message, out: &mut LookupResult) {
    match msg.class {
        MessageClass::Insert | MessageClass::Update => out.set_found(&msg.value),
        MessageClass::Delete => out.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tictoc_core::LexicographicDataConfig;

    #[test]
    fn get_or_create_deduplicates_by_key() {
        let mut txn = TransactionContext::new();
        let idx1 = txn.get_or_create(b"k", false).unwrap();
        let idx2 = txn.get_or_create(b"k", true).unwrap();
        assert_eq!(idx1, idx2);
        assert_eq!(txn.len(), 1);
        assert!(txn.entries[idx1].is_read);
    }

    #[test]
    fn set_msg_merges_update_onto_update() {
        let cfg = LexicographicDataConfig;
        let mut entry = RwEntry::new(b"k".to_vec());
        set_msg(&mut entry, Message::update(b"v1".to_vec()), &cfg);
        set_msg(&mut entry, Message::update(b"v2".to_vec()), &cfg);
        let msg = entry.msg.unwrap();
        assert_eq!(msg.class, MessageClass::Update);
        assert_eq!(msg.value, b"v2".to_vec());
    }

    #[test]
    fn set_msg_preserves_insert_class_when_merged_with_update() {
        let cfg = LexicographicDataConfig;
        let mut entry = RwEntry::new(b"k".to_vec());
        set_msg(&mut entry, Message::insert(b"v1".to_vec()), &cfg);
        set_msg(&mut entry, Message::update(b"v2".to_vec()), &cfg);
        let msg = entry.msg.unwrap();
        assert_eq!(msg.class, MessageClass::Insert);
        assert_eq!(msg.value, b"v2".to_vec());
    }

    #[test]
    fn set_msg_definitive_replaces_buffered_message() {
        let cfg = LexicographicDataConfig;
        let mut entry = RwEntry::new(b"k".to_vec());
        set_msg(&mut entry, Message::update(b"v1".to_vec()), &cfg);
        set_msg(&mut entry, Message::delete(), &cfg);
        let msg = entry.msg.unwrap();
        assert_eq!(msg.class, MessageClass::Delete);
    }

    #[test]
    fn teardown_releases_all_slots() {
        let cache = TimestampCache::new(4, CacheMode::Ephemeral);
        let mut txn = TransactionContext::new();
        let cfg = LexicographicDataConfig;
        txn.local_write(&cache, 0, b"a", Message::delete(), &cfg)
            .unwrap();
        assert_eq!(cache.len(), 1);
        txn.teardown(&cache);
        assert!(txn.is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn teardown_in_retain_all_mode_does_not_underflow_or_evict() {
        let cache = TimestampCache::new(4, CacheMode::RetainAll);
        let mut txn = TransactionContext::new();
        let cfg = LexicographicDataConfig;
        txn.local_write(&cache, 0, b"a", Message::delete(), &cfg)
            .unwrap();
        assert_eq!(cache.len(), 1);
        txn.teardown(&cache);
        assert!(txn.is_empty());
        assert_eq!(
            cache.len(),
            1,
            "retain-all mode keeps the slot after teardown with no matching refcount release"
        );
    }
}
