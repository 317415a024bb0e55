//! Transactional configuration and the `DataConfig` capability pair.
//!
//! The comparator and merge function a deployment needs are modeled as
//! a trait object so the engine can be generic over key/value
//! encodings without generics leaking into every call site.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

/// Isolation level requested of a transactional handle.
///
/// Default is `Serializable`, the only level the TicToc commit engine
/// actually provides. `Snapshot` exists so `set_isolation_level` has a
/// second, genuinely distinct level to reject: snapshot isolation is
/// named as an explicit Non-goal of this engine (it would need
/// multi-version history this cache doesn't keep), so requesting it is
/// rejected rather than silently downgraded to `Serializable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Full serializability via the TicToc commit protocol.
    Serializable,
    /// Snapshot isolation. Not implemented; requesting it is rejected.
    Snapshot,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Serializable
    }
}

/// Comparator and merge capability required by the commit engine.
///
/// - `compare` establishes the global key order used to sort and lock
///   the write set (spec Section 4.4 Phase 1), breaking deadlocks.
/// - `merge` combines a buffered UPDATE with whatever was already
///   buffered for that key (spec Section 4.3); it is never called to
///   merge onto a DELETE.
pub trait DataConfig: Send + Sync {
    /// Compare two keys for the purposes of write-set ordering.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Merge an incoming UPDATE delta onto an existing buffered value.
    fn merge(&self, key: &[u8], existing: &[u8], delta: &[u8]) -> Vec<u8>;
}

/// A `DataConfig` that treats keys as raw bytes and updates as
/// last-write-wins overwrites.
///
/// This is the default used by `refstore`-backed handles and by tests;
/// real deployments with structured values (counters, JSON documents,
/// ...) supply their own `DataConfig`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicographicDataConfig;

impl DataConfig for LexicographicDataConfig {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn merge(&self, _key: &[u8], _existing: &[u8], delta: &[u8]) -> Vec<u8> {
        delta.to_vec()
    }
}

/// Whether timestamp-cache slots are physically reclaimed once no
/// transaction references them, or retained for the life of the cache.
///
/// Spec Section 3: "Mode is fixed at build configuration" — this is
/// that configuration knob, threaded through `TicTocConfig` so the
/// Public API can actually select retain-all mode rather than leaving
/// it reachable only from the cache's own internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Slots are removed once their refcount returns to zero.
    Ephemeral,
    /// Slots are never removed once inserted.
    RetainAll,
}

impl Default for CacheMode {
    fn default() -> Self {
        CacheMode::Ephemeral
    }
}

/// Default `log2` of the timestamp cache's slot array (spec Section 6).
pub const DEFAULT_TSCACHE_LOG_SLOTS: u32 = 29;

fn default_lock_retry_backoff() -> Duration {
    Duration::from_micros(1)
}

/// Configuration for a transactional handle.
///
/// Wraps the backend's own configuration verbatim (spec Section 6) plus
/// the two knobs the engine itself needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicTocConfig<BackendConfig> {
    /// Configuration forwarded unmodified to `KvBackend::create_or_open`.
    pub backend_config: BackendConfig,

    /// `log2` of the timestamp cache's slot array. Default 29.
    #[serde(default = "default_tscache_log_slots")]
    pub tscache_log_slots: u32,

    /// Isolation level requested. Default `Serializable`.
    #[serde(default)]
    pub isol_level: IsolationLevel,

    /// Timestamp-cache slot reclamation mode. Default `Ephemeral`.
    #[serde(default)]
    pub cache_mode: CacheMode,

    /// Sleep duration between lock-set retries during Phase 2 of commit.
    ///
    /// Per spec Section 9 ("Retry/backoff"): this is a tunable, not a
    /// correctness constant. Tests that want deterministic retry counts
    /// may set this to `Duration::ZERO`.
    #[serde(skip, default = "default_lock_retry_backoff")]
    pub lock_retry_backoff: Duration,

    /// When true, seeds `commit_ts` one higher than the Silo protocol
    /// would (spec Section 4.4 Phase 0's "optionally +1").
    #[serde(default)]
    pub silo_compatible_commit_ts: bool,
}

fn default_tscache_log_slots() -> u32 {
    DEFAULT_TSCACHE_LOG_SLOTS
}

impl<BackendConfig> TicTocConfig<BackendConfig> {
    /// Build a config with every tunable at its spec-mandated default.
    pub fn new(backend_config: BackendConfig) -> Self {
        TicTocConfig {
            backend_config,
            tscache_log_slots: DEFAULT_TSCACHE_LOG_SLOTS,
            isol_level: IsolationLevel::Serializable,
            cache_mode: CacheMode::Ephemeral,
            lock_retry_backoff: default_lock_retry_backoff(),
            silo_compatible_commit_ts: false,
        }
    }

    /// Like [`Self::new`], but with `cache_mode` set to
    /// [`CacheMode::RetainAll`].
    pub fn new_retain_all(backend_config: BackendConfig) -> Self {
        TicTocConfig {
            cache_mode: CacheMode::RetainAll,
            ..Self::new(backend_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_compare_orders_by_bytes() {
        let cfg = LexicographicDataConfig;
        assert_eq!(cfg.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(cfg.compare(b"b", b"a"), Ordering::Greater);
        assert_eq!(cfg.compare(b"a", b"a"), Ordering::Equal);
    }

    #[test]
    fn lexicographic_merge_is_last_write_wins() {
        let cfg = LexicographicDataConfig;
        assert_eq!(cfg.merge(b"k", b"old", b"new"), b"new".to_vec());
    }

    #[test]
    fn config_defaults_match_spec() {
        let cfg = TicTocConfig::new(());
        assert_eq!(cfg.tscache_log_slots, 29);
        assert_eq!(cfg.isol_level, IsolationLevel::Serializable);
        assert_eq!(cfg.cache_mode, CacheMode::Ephemeral);
        assert!(!cfg.silo_compatible_commit_ts);
    }

    #[test]
    fn new_retain_all_sets_cache_mode_and_nothing_else() {
        let cfg = TicTocConfig::new_retain_all(());
        assert_eq!(cfg.cache_mode, CacheMode::RetainAll);
        assert_eq!(cfg.isol_level, IsolationLevel::Serializable);
    }
}
