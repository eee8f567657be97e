//! Super-feature extraction for resemblance detection.
//!
//! A chunk is split into [`FEATURE_NUM`] equal sub-ranges. Each sub-range
//! contributes the maximum of a transformed 48-byte rolling hash. The
//! maxima are sorted in groups of [`SF_NUM`] and regrouped by rank into
//! [`SF_NUM`] super-features, each summarized by a BLAKE2b-256 digest.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rayon::prelude::*;

use sealdup_types::{SuperFeatures, SF_NUM};

use crate::error::{Result, SealdupError};
use crate::hash::splitmix64;

pub const FEATURE_NUM: usize = 12;
pub const WINDOW_SIZE: usize = 48;

const BASE: u64 = 37;
const MODULUS: u64 = 1_000_000_007;
const TRANSFORM_SEED: u64 = 922;

/// Features per super-feature.
const GROUPS: usize = FEATURE_NUM / SF_NUM;

type Blake2b256 = Blake2b<U32>;

/// Stateless apart from its transform table and worker pool; safe to share
/// behind `&` across sessions.
pub struct FeatureExtractor {
    transforms: [(u32, u32); FEATURE_NUM],
    /// `BASE^(WINDOW_SIZE - 1) mod MODULUS`, the weight of the outgoing byte.
    drop_weight: u64,
    pool: Option<rayon::ThreadPool>,
}

impl FeatureExtractor {
    /// `threads == 1` extracts inline on the calling thread.
    pub fn new(threads: usize) -> Result<Self> {
        let mut state = TRANSFORM_SEED;
        let mut transforms = [(0u32, 0u32); FEATURE_NUM];
        for t in transforms.iter_mut() {
            let r = splitmix64(&mut state);
            // Odd multiplier keeps the transform a bijection mod 2^32.
            *t = ((r as u32) | 1, (r >> 32) as u32);
        }
        let drop_weight = (0..WINDOW_SIZE - 1).fold(1u64, |acc, _| acc * BASE % MODULUS);
        Ok(Self {
            transforms,
            drop_weight,
            pool: build_feature_pool(threads)?,
        })
    }

    /// Compute the super-features of one chunk.
    pub fn extract(&self, content: &[u8]) -> SuperFeatures {
        let size = content.len();
        let mut features = [0u32; FEATURE_NUM];
        for (i, feature) in features.iter_mut().enumerate() {
            let start = size * i / FEATURE_NUM;
            let end = size * (i + 1) / FEATURE_NUM;
            let (m, a) = self.transforms[i];
            *feature = self.max_window_hash(&content[start..end], m, a);
        }

        for group in features.chunks_mut(SF_NUM) {
            group.sort_unstable();
        }

        let mut out = SuperFeatures::default();
        for (i, digest) in out.0.iter_mut().enumerate() {
            let mut hasher = Blake2b256::new();
            for j in 0..GROUPS {
                hasher.update((features[j * SF_NUM + i] as u64).to_le_bytes());
            }
            digest.copy_from_slice(&hasher.finalize());
        }
        out
    }

    /// Extract super-features for every chunk, fanning out over the pool.
    /// Returns only after all workers have finished.
    pub fn extract_batch(&self, chunks: &[&[u8]]) -> Vec<SuperFeatures> {
        match &self.pool {
            Some(pool) => pool.install(|| chunks.par_iter().map(|c| self.extract(c)).collect()),
            None => chunks.iter().map(|c| self.extract(c)).collect(),
        }
    }

    /// Maximum transformed rolling hash over every full window of `range`.
    /// A range shorter than one window is hashed as a single window.
    fn max_window_hash(&self, range: &[u8], m: u32, a: u32) -> u32 {
        let transform = |h: u64| m.wrapping_mul(h as u32).wrapping_add(a);
        let window = WINDOW_SIZE.min(range.len());
        let mut h = range[..window]
            .iter()
            .fold(0u64, |acc, &b| (acc * BASE + b as u64) % MODULUS);
        let mut best = transform(h);
        for pos in window..range.len() {
            let outgoing = range[pos - WINDOW_SIZE] as u64 * self.drop_weight % MODULUS;
            h = (h + MODULUS - outgoing) % MODULUS;
            h = (h * BASE + range[pos] as u64) % MODULUS;
            best = best.max(transform(h));
        }
        best
    }
}

fn build_feature_pool(threads: usize) -> Result<Option<rayon::ThreadPool>> {
    if threads <= 1 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("sealdup-features-{i}"))
        .build()
        .map(Some)
        .map_err(|e| SealdupError::Other(format!("failed to create feature thread pool: {e}")))
}
