use serde::{Deserialize, Serialize};

use crate::policy::SkipReason;

/// Similarity hits that did not end in a delta, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub sentinel: u64,
    pub base_is_delta: u64,
    pub saturated: u64,
    pub reuse_limit: u64,
    pub load_budget: u64,
    pub unavailable: u64,
    pub no_gain: u64,
}

impl SkipCounts {
    pub fn record(&mut self, reason: SkipReason) {
        let slot = match reason {
            SkipReason::Sentinel => &mut self.sentinel,
            SkipReason::BaseIsDelta => &mut self.base_is_delta,
            SkipReason::Saturated => &mut self.saturated,
            SkipReason::ReuseLimit => &mut self.reuse_limit,
            SkipReason::LoadBudget => &mut self.load_budget,
            SkipReason::Unavailable => &mut self.unavailable,
            SkipReason::NoGain => &mut self.no_gain,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u64 {
        self.sentinel
            + self.base_is_delta
            + self.saturated
            + self.reuse_limit
            + self.load_budget
            + self.unavailable
            + self.no_gain
    }

    fn merge(&mut self, other: &SkipCounts) {
        self.sentinel += other.sentinel;
        self.base_is_delta += other.base_is_delta;
        self.saturated += other.saturated;
        self.reuse_limit += other.reuse_limit;
        self.load_budget += other.load_budget;
        self.unavailable += other.unavailable;
        self.no_gain += other.no_gain;
    }
}

/// Engine counters. A batch fills its own copy and merges it into the
/// shared one at commit; the shared copy is persisted with the state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub batches: u64,
    pub logical_chunks: u64,
    pub logical_bytes: u64,
    /// Chunks stored whole.
    pub unique_chunks: u64,
    pub unique_bytes: u64,
    /// Bytes written to containers (sealed records), whole and delta.
    pub stored_bytes: u64,
    pub delta_chunks: u64,
    /// Raw size of the chunks stored as deltas.
    pub delta_source_bytes: u64,
    /// Size of the delta streams that replaced them.
    pub delta_bytes: u64,
    pub duplicate_top_k: u64,
    pub duplicate_external: u64,
    pub duplicate_batch_local: u64,
    pub container_loads: u64,
    pub cache_hits: u64,
    pub resident_hits: u64,
    pub skipped: SkipCounts,
    pub deferred_pairs: u64,
    pub offline_passes: u64,
}

impl EngineStats {
    pub fn merge(&mut self, other: &EngineStats) {
        self.batches += other.batches;
        self.logical_chunks += other.logical_chunks;
        self.logical_bytes += other.logical_bytes;
        self.unique_chunks += other.unique_chunks;
        self.unique_bytes += other.unique_bytes;
        self.stored_bytes += other.stored_bytes;
        self.delta_chunks += other.delta_chunks;
        self.delta_source_bytes += other.delta_source_bytes;
        self.delta_bytes += other.delta_bytes;
        self.duplicate_top_k += other.duplicate_top_k;
        self.duplicate_external += other.duplicate_external;
        self.duplicate_batch_local += other.duplicate_batch_local;
        self.container_loads += other.container_loads;
        self.cache_hits += other.cache_hits;
        self.resident_hits += other.resident_hits;
        self.skipped.merge(&other.skipped);
        self.deferred_pairs += other.deferred_pairs;
        self.offline_passes += other.offline_passes;
    }

    pub fn duplicate_chunks(&self) -> u64 {
        self.duplicate_top_k + self.duplicate_external + self.duplicate_batch_local
    }

    /// Logical bytes per stored byte; 0.0 before anything is stored.
    pub fn reduction_ratio(&self) -> f64 {
        if self.stored_bytes == 0 {
            return 0.0;
        }
        self.logical_bytes as f64 / self.stored_bytes as f64
    }
}
