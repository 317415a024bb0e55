//! The Timestamp Word.
//!
//! A single naturally-aligned 64-bit cell packing a lock bit, a 15-bit
//! delta, and a 48-bit write timestamp. It is updated only through
//! compare-and-swap; splitting these fields into independently-atomic
//! cells would make the read-validation / extension procedure in
//! `crate::commit` unsound, since correctness depends on observing
//! `(wts, delta, lock_bit)` as one consistent snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

const LOCK_SHIFT: u32 = 63;
const DELTA_SHIFT: u32 = 48;
const WTS_BITS: u32 = 48;
const DELTA_BITS: u32 = 15;

const WTS_MASK: u64 = (1u64 << WTS_BITS) - 1;
const DELTA_MASK: u64 = (1u64 << DELTA_BITS) - 1;
const LOCK_MASK: u64 = 1u64 << LOCK_SHIFT;

/// Maximum value representable in the 15-bit delta field.
pub const MAX_DELTA: u64 = DELTA_MASK;

/// Maximum value representable in the 48-bit wts field.
pub const MAX_WTS: u64 = WTS_MASK;

/// An unpacked view of a [`TimestampWord`] at some instant.
///
/// Carries the raw packed word alongside the decoded fields so callers
/// can feed `raw` straight back into [`TimestampWord::cas`] as the
/// expected value without repacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// The full 64-bit packed word this snapshot was decoded from.
    pub raw: u64,
    /// Whether the tuple is currently lock-held by some committer.
    pub lock_bit: bool,
    /// The non-negative offset added to `wts` to form `rts`.
    pub delta: u16,
    /// The write timestamp of the last committer of this key.
    pub wts: u64,
}

impl Snapshot {
    /// Build a snapshot (and its packed `raw` form) from decoded fields.
    pub fn new(lock_bit: bool, delta: u16, wts: u64) -> Self {
        Snapshot {
            raw: pack(lock_bit, delta, wts),
            lock_bit,
            delta,
            wts,
        }
    }

    /// `rts = wts + delta`: the timestamp through which this tuple's
    /// value is known to be valid.
    pub fn rts(&self) -> u64 {
        self.wts + self.delta as u64
    }
}

fn pack(lock_bit: bool, delta: u16, wts: u64) -> u64 {
    debug_assert!(wts <= MAX_WTS, "wts exceeds 48 bits");
    debug_assert!(delta as u64 <= MAX_DELTA, "delta exceeds 15 bits");
    let lock = if lock_bit { LOCK_MASK } else { 0 };
    let delta_bits = (delta as u64 & DELTA_MASK) << DELTA_SHIFT;
    lock | delta_bits | (wts & WTS_MASK)
}

fn unpack(raw: u64) -> Snapshot {
    let lock_bit = raw & LOCK_MASK != 0;
    let delta = ((raw >> DELTA_SHIFT) & DELTA_MASK) as u16;
    let wts = raw & WTS_MASK;
    Snapshot {
        raw,
        lock_bit,
        delta,
        wts,
    }
}

/// The packed, CAS-only timestamp cell for one key.
#[derive(Debug)]
pub struct TimestampWord(AtomicU64);

impl TimestampWord {
    /// A fresh word for a key that has never been written: `wts = 0`,
    /// `delta = 0`, unlocked.
    pub fn new() -> Self {
        TimestampWord(AtomicU64::new(pack(false, 0, 0)))
    }

    /// A word seeded at a specific committed `wts` (used by backends that
    /// bootstrap a cache slot from already-durable data).
    pub fn with_wts(wts: u64) -> Self {
        TimestampWord(AtomicU64::new(pack(false, 0, wts)))
    }

    /// Acquire read of the packed word, decoded.
    ///
    /// Every call site that needs to act on what it read re-validates via
    /// CAS rather than trusting a bare load to still hold by the time it
    /// matters, but the load itself still needs to synchronize with the
    /// release half of the CAS that produced the value (the double-read
    /// / extend-by-CAS rules in `crate::commit` depend on it).
    pub fn load(&self) -> Snapshot {
        unpack(self.0.load(Ordering::Acquire))
    }

    /// Attempt to transition `expected -> new`. Succeeds iff the full
    /// 64-bit word still equals `expected.raw`.
    pub fn cas(&self, expected: Snapshot, new: Snapshot) -> bool {
        self.0
            .compare_exchange(
                expected.raw,
                new.raw,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Non-blocking attempt to set the lock bit.
    ///
    /// Returns the pre-lock snapshot on success (which the caller needs
    /// to compute `commit_ts` and to unlock later), or `None` if the
    /// word was already locked or changed under us. Does not spin or
    /// retry; the Commit Engine's Phase 2 owns the retry loop.
    pub fn try_lock(&self) -> Option<Snapshot> {
        let before = self.load();
        if before.lock_bit {
            return None;
        }
        let after = Snapshot::new(true, before.delta, before.wts);
        if self.cas(before, after) {
            Some(before)
        } else {
            None
        }
    }

    /// Clear the lock bit, looping because a concurrent reader may have
    /// extended `delta` while we held the lock.
    pub fn unlock(&self) {
        loop {
            let before = self.load();
            debug_assert!(before.lock_bit, "unlock called on an unlocked word");
            let after = Snapshot::new(false, before.delta, before.wts);
            if self.cas(before, after) {
                return;
            }
        }
    }

    /// Publish a new committed version: `(wts = commit_ts, delta = 0,
    /// lock_bit = 0)`. Used by Phase 5 after a writer's value has been
    /// applied to the backend.
    ///
    /// Loops on CAS for the same reason as `unlock`: the word may have
    /// been observed by a reader between the lock being taken and this
    /// call, though no other writer can touch it while we hold the lock.
    pub fn publish_commit(&self, commit_ts: u64) {
        loop {
            let before = self.load();
            debug_assert!(before.lock_bit, "publish_commit called on an unlocked word");
            let after = Snapshot::new(false, 0, commit_ts);
            if self.cas(before, after) {
                return;
            }
        }
    }
}

impl Default for TimestampWord {
    fn default() -> Self {
        TimestampWord::new()
    }
}

/// Compute the `(wts, delta)` pair that raises `rts` to at least
/// `commit_ts`.
///
/// `wts` only ever moves by multiples of `2^15`, so the low 15 bits of
/// the *original* `wts` survive the shift — which is the property that
/// makes the read-validation CAS in `crate::commit` safe: a concurrent
/// committer reading the same original snapshot and racing to extend it
/// will fail its CAS rather than silently clobbering this extension.
pub fn compute_extension(v1: Snapshot, commit_ts: u64) -> (u64, u16) {
    debug_assert!(commit_ts >= v1.wts);
    let delta = commit_ts - v1.wts;
    let shift = delta & !MAX_DELTA;
    let new_wts = v1.wts + shift;
    let new_delta = delta - shift;
    debug_assert!(new_delta <= MAX_DELTA);
    (new_wts, new_delta as u16)
}
