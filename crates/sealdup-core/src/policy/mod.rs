//! Per-batch delta selection.
//!
//! Both selection strategies share one shape: a sentinel filter, a gate
//! that limits how hard the batch leans on base containers, then the common
//! cache-or-load tail under a hard per-batch load budget. They differ only
//! in the gate metric, so they are one [`SelectionPolicy`] parameterized by
//! [`Gate`].

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use sealdup_types::{ContainerId, Fingerprint, StorageAddress};

use crate::cache::ContainerCache;
use crate::config::{DeltaConfig, IndexVariant};

/// Fingerprints starting with these bytes are reserved and never
/// delta-encoded.
pub const SENTINEL_PREFIX: [u8; 3] = [161, 77, 140];

/// How a batch limits its use of base containers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    /// Stop all delta work for the rest of the batch once more than
    /// `chunk_count * ratio` distinct containers have been touched.
    Saturation { ratio: f64 },
    /// Stop using a container once its use count this batch exceeds
    /// `limit`.
    Reuse { limit: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    Sentinel,
    BaseIsDelta,
    Saturated,
    ReuseLimit,
    LoadBudget,
    /// The store did not have the container.
    Unavailable,
    /// The delta was not smaller than the chunk.
    NoGain,
}

/// Outcome for one similarity hit.
#[derive(Debug, Clone)]
pub enum Selection {
    Skip(SkipReason),
    /// Base container served from the cache.
    Cached(Bytes),
    /// Base lives in the session's open container.
    Resident,
    /// The caller must issue one `LoadContainer` and insert the result into
    /// the cache. The load has already been charged to the budget.
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    pub gate: Gate,
    pub max_loads: usize,
}

impl SelectionPolicy {
    /// Policy for `variant`, or `None` when the variant never deltas.
    pub fn for_variant(variant: IndexVariant, delta: &DeltaConfig, forward_only: bool) -> Option<Self> {
        if !delta.enabled {
            return None;
        }
        let gate = match variant {
            IndexVariant::Frequency => Gate::Saturation {
                ratio: if forward_only {
                    delta.saturation_ratio
                } else {
                    delta.offline_saturation_ratio
                },
            },
            IndexVariant::Mega => Gate::Reuse {
                limit: delta.reuse_limit,
            },
            IndexVariant::Exact => return None,
        };
        Some(Self {
            gate,
            max_loads: delta.max_container_loads,
        })
    }

    pub fn begin_batch(&self, chunk_count: usize) -> BatchSelector {
        BatchSelector {
            policy: *self,
            saturation_limit: match self.gate {
                Gate::Saturation { ratio } => chunk_count as f64 * ratio,
                Gate::Reuse { .. } => f64::INFINITY,
            },
            touched: HashSet::new(),
            saturated: false,
            served: HashMap::new(),
            loads: 0,
            deferred: Vec::new(),
        }
    }
}

/// Selection state for one batch.
#[derive(Debug)]
pub struct BatchSelector {
    policy: SelectionPolicy,
    saturation_limit: f64,
    touched: HashSet<ContainerId>,
    saturated: bool,
    served: HashMap<ContainerId, u32>,
    loads: usize,
    deferred: Vec<(Fingerprint, Fingerprint)>,
}

impl BatchSelector {
    /// Decide how to treat `chunk` given its similarity candidate `base`.
    /// `cache` is only read; the caller holds its lock for this call.
    pub fn decide(
        &mut self,
        chunk: &Fingerprint,
        base_fp: &Fingerprint,
        base: &StorageAddress,
        cache: &ContainerCache,
    ) -> Selection {
        if let Some(reason) = self.screen(chunk, base_fp, base) {
            return Selection::Skip(reason);
        }
        if let Some(bytes) = cache.read(&base.container) {
            return Selection::Cached(bytes);
        }
        if self.loads >= self.policy.max_loads {
            return Selection::Skip(SkipReason::LoadBudget);
        }
        self.loads += 1;
        Selection::Load
    }

    /// Like [`decide`](Self::decide) for a base whose container is still
    /// open in the calling session. Gates apply; no load is ever needed.
    pub fn decide_resident(
        &mut self,
        chunk: &Fingerprint,
        base_fp: &Fingerprint,
        base: &StorageAddress,
    ) -> Selection {
        match self.screen(chunk, base_fp, base) {
            Some(reason) => Selection::Skip(reason),
            None => Selection::Resident,
        }
    }

    fn screen(
        &mut self,
        chunk: &Fingerprint,
        base_fp: &Fingerprint,
        base: &StorageAddress,
    ) -> Option<SkipReason> {
        if chunk.has_prefix(&SENTINEL_PREFIX) {
            return Some(SkipReason::Sentinel);
        }
        if base.delta {
            return Some(SkipReason::BaseIsDelta);
        }
        match self.policy.gate {
            Gate::Saturation { .. } => {
                if !self.saturated {
                    self.touched.insert(base.container);
                    if self.touched.len() as f64 > self.saturation_limit {
                        self.saturated = true;
                    }
                }
                if self.saturated {
                    self.deferred.push((*base_fp, *chunk));
                    return Some(SkipReason::Saturated);
                }
            }
            Gate::Reuse { limit } => {
                let served = self.served.entry(base.container).or_insert(0);
                if *served > limit {
                    return Some(SkipReason::ReuseLimit);
                }
                *served += 1;
            }
        }
        None
    }

    pub fn loads(&self) -> usize {
        self.loads
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// `(base, new)` pairs skipped by saturation, for the offline pass.
    pub fn take_deferred(&mut self) -> Vec<(Fingerprint, Fingerprint)> {
        std::mem::take(&mut self.deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u8) -> Fingerprint {
        Fingerprint([n; 32])
    }

    fn base_in(container: u8) -> StorageAddress {
        StorageAddress::whole(ContainerId([container; 16]), 0, 100)
    }

    fn saturation(ratio: f64, max_loads: usize) -> SelectionPolicy {
        SelectionPolicy {
            gate: Gate::Saturation { ratio },
            max_loads,
        }
    }

    fn reuse(limit: u32, max_loads: usize) -> SelectionPolicy {
        SelectionPolicy {
            gate: Gate::Reuse { limit },
            max_loads,
        }
    }

    #[test]
    fn sentinel_prefix_always_skips() {
        let cache = ContainerCache::new(4);
        let mut raw = [0u8; 32];
        raw[..3].copy_from_slice(&SENTINEL_PREFIX);
        for policy in [saturation(10.0, 10), reuse(10, 10)] {
            let mut sel = policy.begin_batch(4);
            let out = sel.decide(&Fingerprint(raw), &chunk(9), &base_in(1), &cache);
            assert!(matches!(out, Selection::Skip(SkipReason::Sentinel)));
            assert_eq!(sel.loads(), 0);
        }
    }

    #[test]
    fn delta_base_is_skipped() {
        let cache = ContainerCache::new(4);
        let mut sel = saturation(10.0, 10).begin_batch(4);
        let base = StorageAddress::delta(ContainerId([1; 16]), 0, 10, chunk(7));
        assert!(matches!(
            sel.decide(&chunk(1), &chunk(9), &base, &cache),
            Selection::Skip(SkipReason::BaseIsDelta)
        ));
    }

    #[test]
    fn cached_container_is_served_without_load() {
        let mut cache = ContainerCache::new(4);
        cache.insert(ContainerId([1; 16]), Bytes::from_static(b"container"));
        let mut sel = reuse(4, 0).begin_batch(4);
        match sel.decide(&chunk(1), &chunk(9), &base_in(1), &cache) {
            Selection::Cached(bytes) => assert_eq!(bytes, Bytes::from_static(b"container")),
            other => panic!("expected cache hit, got {other:?}"),
        }
        assert_eq!(sel.loads(), 0);
    }

    #[test]
    fn load_budget_is_enforced() {
        let cache = ContainerCache::new(4);
        let mut sel = reuse(10, 2).begin_batch(8);
        assert!(matches!(sel.decide(&chunk(1), &chunk(9), &base_in(1), &cache), Selection::Load));
        assert!(matches!(sel.decide(&chunk(2), &chunk(9), &base_in(2), &cache), Selection::Load));
        assert!(matches!(
            sel.decide(&chunk(3), &chunk(9), &base_in(3), &cache),
            Selection::Skip(SkipReason::LoadBudget)
        ));
        assert_eq!(sel.loads(), 2);
    }

    #[test]
    fn saturation_forces_skip_for_rest_of_batch() {
        let cache = ContainerCache::new(8);
        // 4 chunks * 0.5 = at most 2 distinct containers.
        let mut sel = saturation(0.5, 100).begin_batch(4);
        assert!(matches!(sel.decide(&chunk(1), &chunk(11), &base_in(1), &cache), Selection::Load));
        assert!(matches!(sel.decide(&chunk(2), &chunk(12), &base_in(2), &cache), Selection::Load));
        assert!(!sel.is_saturated());
        assert!(matches!(
            sel.decide(&chunk(3), &chunk(13), &base_in(3), &cache),
            Selection::Skip(SkipReason::Saturated)
        ));
        // Even an already-touched container is refused now.
        assert!(matches!(
            sel.decide(&chunk(4), &chunk(14), &base_in(1), &cache),
            Selection::Skip(SkipReason::Saturated)
        ));
        assert_eq!(
            sel.take_deferred(),
            vec![(chunk(13), chunk(3)), (chunk(14), chunk(4))]
        );
        assert!(sel.take_deferred().is_empty());
    }

    #[test]
    fn reuse_limit_is_per_container() {
        let mut cache = ContainerCache::new(8);
        cache.insert(ContainerId([1; 16]), Bytes::from_static(b"a"));
        cache.insert(ContainerId([2; 16]), Bytes::from_static(b"b"));
        let mut sel = reuse(2, 100).begin_batch(16);
        for n in 0..3 {
            assert!(matches!(
                sel.decide(&chunk(n), &chunk(9), &base_in(1), &cache),
                Selection::Cached(_)
            ));
        }
        assert!(matches!(
            sel.decide(&chunk(5), &chunk(9), &base_in(1), &cache),
            Selection::Skip(SkipReason::ReuseLimit)
        ));
        assert!(matches!(
            sel.decide(&chunk(6), &chunk(9), &base_in(2), &cache),
            Selection::Cached(_)
        ));
    }

    #[test]
    fn resident_base_passes_gate_without_load() {
        let mut sel = reuse(1, 0).begin_batch(4);
        for n in 1..=2 {
            assert!(matches!(
                sel.decide_resident(&chunk(n), &chunk(9), &base_in(1)),
                Selection::Resident
            ));
        }
        assert!(matches!(
            sel.decide_resident(&chunk(3), &chunk(9), &base_in(1)),
            Selection::Skip(SkipReason::ReuseLimit)
        ));
        assert_eq!(sel.loads(), 0);
    }

    #[test]
    fn new_batch_resets_state() {
        let cache = ContainerCache::new(8);
        let policy = reuse(1, 1);
        let mut first = policy.begin_batch(2);
        assert!(matches!(first.decide(&chunk(1), &chunk(9), &base_in(1), &cache), Selection::Load));
        let mut second = policy.begin_batch(2);
        assert!(matches!(second.decide(&chunk(2), &chunk(9), &base_in(1), &cache), Selection::Load));
    }

    #[test]
    fn variant_mapping() {
        let delta = DeltaConfig::default();
        assert!(SelectionPolicy::for_variant(IndexVariant::Exact, &delta, false).is_none());
        let forward = SelectionPolicy::for_variant(IndexVariant::Frequency, &delta, true).unwrap();
        assert_eq!(forward.gate, Gate::Saturation { ratio: delta.saturation_ratio });
        let offline = SelectionPolicy::for_variant(IndexVariant::Frequency, &delta, false).unwrap();
        assert_eq!(offline.gate, Gate::Saturation { ratio: delta.offline_saturation_ratio });
        let mega = SelectionPolicy::for_variant(IndexVariant::Mega, &delta, false).unwrap();
        assert_eq!(mega.gate, Gate::Reuse { limit: delta.reuse_limit });

        let disabled = DeltaConfig {
            enabled: false,
            ..DeltaConfig::default()
        };
        assert!(SelectionPolicy::for_variant(IndexVariant::Mega, &disabled, false).is_none());
    }
}
