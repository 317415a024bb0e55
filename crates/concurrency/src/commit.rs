//! The Commit Engine: the TicToc validate-lock-extend-write protocol.
//!
//! Correctness rests on the write set locking in a global key order
//! (deadlock freedom), on raising `commit_ts` past every writer's
//! observed `rts`, and on an ABA-free read-timestamp extension (Phase
//! 4) that either observes a conflicting overwrite and aborts, or
//! extends the reader's timestamp atomically via CAS.

use std::sync::Arc;
use std::time::Duration;

use tictoc_core::{DataConfig, KvBackend, MessageClass};

use crate::cache::{Slot, TimestampCache};
use crate::entry::TransactionContext;
use crate::error::{Result, TxnError};
use crate::timestamp::{compute_extension, Snapshot};

/// Run the full TicToc commit protocol for `txn` against `backend`,
/// using `cache` for timestamp words and `data_config` for write-set
/// ordering.
///
/// Returns the commit timestamp on success. On conflict, every lock
/// taken during this attempt is released, the transaction context is
/// torn down, and `Err(TxnError::Aborted { .. })` is returned: the
/// caller must discard the (already-deinitialized) context and may
/// retry with a fresh `begin`.
pub fn commit<B: KvBackend>(
    txn: &mut TransactionContext,
    cache: &TimestampCache,
    backend: &B,
    data_config: &dyn DataConfig,
    tid: u64,
    lock_retry_backoff: Duration,
    silo_compatible_commit_ts: bool,
) -> Result<u64> {
    // Phase 0: partition into read_set / write_set indices. An entry
    // with a buffered msg is a writer; is_read=true makes it a reader.
    // An entry may be both.
    let write_idx: Vec<usize> = txn
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.msg.is_some())
        .map(|(i, _)| i)
        .collect();
    let read_idx: Vec<usize> = txn
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_read)
        .map(|(i, _)| i)
        .collect();

    let mut commit_ts = read_idx
        .iter()
        .map(|&i| txn.entries[i].wts)
        .max()
        .unwrap_or(0);
    if silo_compatible_commit_ts {
        commit_ts += 1;
    }

    // Fast path: nothing to write. Validate reads only, no locking.
    if write_idx.is_empty() {
        let result = validate_all_readers(txn, &read_idx, commit_ts);
        txn.teardown(cache);
        return result.map(|()| commit_ts);
    }

    // Phase 1: sort the write set by key under the data config's comparator.
    let mut sorted_writers = write_idx.clone();
    sorted_writers.sort_by(|&a, &b| data_config.compare(&txn.entries[a].key, &txn.entries[b].key));

    // Bind a cache slot for every writer that doesn't already have one
    // (pure INSERTs bind lazily, here).
    for &idx in &sorted_writers {
        if txn.entries[idx].tuple_ts.is_none() {
            txn.entries[idx].tuple_ts = Some(cache.bind(&txn.entries[idx].key, tid));
        }
    }

    // Phase 2: lock the write set in sorted order, retrying the whole
    // set on any contention. Global key order guarantees some committer
    // eventually wins.
    let locked_slots = lock_write_set(txn, &sorted_writers, lock_retry_backoff);

    // Phase 3: raise commit_ts past every writer's observed rts.
    for slot in &locked_slots {
        let rts = slot.word.load().rts();
        commit_ts = commit_ts.max(rts + 1);
    }

    // Phase 4: validate (and extend) every reader whose cached rts is
    // stale with respect to the now-final commit_ts.
    let validation = validate_all_readers(txn, &read_idx, commit_ts);

    match validation {
        Ok(()) => {
            apply_writes(txn, &sorted_writers, backend, commit_ts);
            txn.teardown(cache);
            Ok(commit_ts)
        }
        Err(e) => {
            for slot in &locked_slots {
                slot.word.unlock();
            }
            txn.teardown(cache);
            Err(e)
        }
    }
}

/// Phase 2: try to lock every writer's slot in `order`. On any failure,
/// unlock everything acquired so far in this attempt, back off briefly,
/// and retry from the first writer.
fn lock_write_set(
    txn: &TransactionContext,
    order: &[usize],
    backoff: Duration,
) -> Vec<Arc<Slot>> {
    loop {
        let mut locked = Vec::with_capacity(order.len());
        let mut contended = false;
        for &idx in order {
            let slot = Arc::clone(txn.entries[idx].tuple_ts.as_ref().expect(
                "writer must have a bound cache slot before locking",
            ));
            if slot.word.try_lock().is_some() {
                locked.push(slot);
            } else {
                contended = true;
                break;
            }
        }
        if !contended {
            return locked;
        }
        for slot in &locked {
            slot.word.unlock();
        }
        if !backoff.is_zero() {
            std::thread::sleep(backoff);
        }
    }
}

/// Phase 4 for every reader: check for an overwrite since the read,
/// check for a conflicting concurrent lock, and extend the read
/// timestamp via CAS if neither applies.
fn validate_all_readers(
    txn: &mut TransactionContext,
    read_idx: &[usize],
    commit_ts: u64,
) -> Result<()> {
    for &idx in read_idx {
        if txn.entries[idx].rts >= commit_ts {
            continue;
        }
        let is_writer_of_key = txn.entries[idx].msg.is_some();
        let slot = Arc::clone(
            txn.entries[idx]
                .tuple_ts
                .as_ref()
                .expect("reader must have a bound cache slot"),
        );
        loop {
            let v1 = slot.word.load();

            if v1.wts != txn.entries[idx].wts {
                return Err(TxnError::aborted(format!(
                    "tuple overwritten since read: observed wts {} but slot is now wts {}",
                    txn.entries[idx].wts, v1.wts
                )));
            }

            let rts_v1 = v1.rts();
            if rts_v1 > commit_ts {
                // Already readable through our commit timestamp; nothing to do.
                break;
            }

            if v1.lock_bit && !is_writer_of_key {
                return Err(TxnError::aborted(
                    "tuple is locked by a concurrent committer covering our commit timestamp",
                ));
            }

            let (new_wts, new_delta) = compute_extension(v1, commit_ts);
            let v2 = Snapshot::new(v1.lock_bit, new_delta, new_wts);
            if slot.word.cas(v1, v2) {
                txn.entries[idx].rts = v2.rts();
                break;
            }
            // Lost the CAS race (another transaction touched this word
            // between our load and our CAS); restart from step 1.
        }
    }
    Ok(())
}

/// Phase 5, success path: dispatch every writer's buffered message to
/// the backend in sorted order, then publish the new committed version.
///
/// A backend failure here is fatal: locks are held and `commit_ts` is
/// already chosen, so there is no clean rollback.
fn apply_writes<B: KvBackend>(
    txn: &TransactionContext,
    order: &[usize],
    backend: &B,
    commit_ts: u64,
) {
    for &idx in order {
        let entry = &txn.entries[idx];
        let msg = entry.msg.as_ref().expect("writer entry must carry a message");
        let result = match msg.class {
            MessageClass::Insert => backend.insert(&entry.key, &msg.value),
            MessageClass::Update => backend.update(&entry.key, &msg.value),
            MessageClass::Delete => backend.delete(&entry.key),
        };
        if let Err(e) = result {
            tracing::error!(
                key = ?entry.key,
                class = %msg.class,
                commit_ts,
                error = %e,
                "backend write failed after commit_ts was chosen and locks were held"
            );
            panic!(
                "fatal: backend write failed mid-commit for key {:?}: {}",
                entry.key, e
            );
        }
        entry
            .tuple_ts
            .as_ref()
            .expect("writer entry must have a bound slot by Phase 5")
            .word
            .publish_commit(commit_ts);
    }
}
