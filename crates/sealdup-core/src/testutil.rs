use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use sealdup_types::{ContainerId, Fingerprint, IndexToken, SF_NUM};

use crate::boundary::{MemoryStore, OfflineOutcome, UntrustedStore};
use crate::config::{EngineConfig, IndexVariant};
use crate::crypto::keys::EngineKeys;
use crate::engine::{ChunkBatch, ChunkReader, EngineContext, Session};
use crate::error::Result;

/// Fixed keys for deterministic tests.
pub fn test_keys() -> EngineKeys {
    EngineKeys {
        data_key: [0xAA; 32],
        fingerprint_key: [0xBB; 32],
        index_key: [0xCC; 32],
    }
}

/// Small engine: Top-K of 16, a 4x1024 sketch, 1 MiB containers, recipe
/// flushes every 4 entries, inline feature extraction.
pub fn test_config(variant: IndexVariant) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.index.variant = variant;
    config.index.top_k = 16;
    config.index.sketch_depth = 4;
    config.index.sketch_width = 1024;
    config.index.forward_only = true;
    config.batch.recipe_flush_entries = 4;
    config.cache.capacity = 8;
    config.container.capacity = 1024 * 1024;
    config.features.threads = 1;
    config
}

/// Deterministic pseudo-random chunk.
pub fn random_chunk(seed: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut out);
    out
}

/// `base` with `edits` single bytes changed at seeded positions.
pub fn mutate(base: &[u8], edits: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = base.to_vec();
    for _ in 0..edits {
        let at = rng.gen_range(0..out.len());
        out[at] ^= 0xFF;
    }
    out
}

/// Keep the leading `keep_percent` of `base` and fill the rest with fresh
/// random bytes.
pub fn overlapping(base: &[u8], keep_percent: usize, seed: u64) -> Vec<u8> {
    let keep = base.len() * keep_percent / 100;
    let mut out = base[..keep].to_vec();
    out.extend_from_slice(&random_chunk(seed, base.len() - keep));
    out
}

/// Engine over a shared store, with helpers to open sessions and readers.
pub struct TestEngine<S: UntrustedStore + 'static> {
    pub ctx: Arc<EngineContext>,
    pub store: Arc<S>,
}

impl TestEngine<MemoryStore> {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }
}

impl<S: UntrustedStore + 'static> TestEngine<S> {
    pub fn with_store(config: EngineConfig, store: S) -> Self {
        let ctx = EngineContext::init(config, test_keys()).expect("engine init");
        Self {
            ctx: Arc::new(ctx),
            store: Arc::new(store),
        }
    }

    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.ctx), self.store.clone())
    }

    pub fn reader(&self) -> ChunkReader {
        ChunkReader::new(Arc::clone(&self.ctx), self.store.clone())
    }

    pub fn batch(&self, chunks: &[Vec<u8>]) -> ChunkBatch {
        ChunkBatch::from_chunks(chunks.to_vec(), &self.ctx.config().batch).expect("valid batch")
    }

    pub fn fingerprint(&self, data: &[u8]) -> Fingerprint {
        self.ctx.keys().fingerprint(data)
    }

    pub fn token(&self, data: &[u8]) -> IndexToken {
        let fp = self.fingerprint(data);
        self.ctx.keys().token(&fp)
    }
}

/// Store that answers every candidate query with one pinned chunk,
/// independent of super-features. Everything else goes to the inner
/// [`MemoryStore`]. Can also pretend that no container is loadable, or
/// make every load slow.
#[derive(Default)]
pub struct PinnedBaseStore {
    pub inner: MemoryStore,
    pinned: Mutex<Option<IndexToken>>,
    hide_containers: Mutex<bool>,
    load_delay: Mutex<Option<Duration>>,
}

impl PinnedBaseStore {
    pub fn pin(&self, token: IndexToken) {
        *self.pinned.lock().unwrap() = Some(token);
    }

    pub fn hide_containers(&self, hide: bool) {
        *self.hide_containers.lock().unwrap() = hide;
    }

    pub fn slow_loads(&self, delay: Duration) {
        *self.load_delay.lock().unwrap() = Some(delay);
    }
}

impl UntrustedStore for PinnedBaseStore {
    fn query_index(&self, tokens: &[IndexToken]) -> Result<Vec<Option<Vec<u8>>>> {
        self.inner.query_index(tokens)
    }

    fn query_base_candidates(
        &self,
        features: &[[IndexToken; SF_NUM]],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        // Keep the inner store's call accounting.
        self.inner.query_base_candidates(features)?;
        let pinned = *self.pinned.lock().unwrap();
        Ok(features
            .iter()
            .map(|_| pinned.and_then(|t| self.inner.index_value(&t)))
            .collect())
    }

    fn load_container(&self, id: &ContainerId) -> Result<Option<Vec<u8>>> {
        let delay = *self.load_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let loaded = self.inner.load_container(id)?;
        if *self.hide_containers.lock().unwrap() {
            return Ok(None);
        }
        Ok(loaded)
    }

    fn write_container(&self, id: &ContainerId, data: Vec<u8>) -> Result<()> {
        self.inner.write_container(id, data)
    }

    fn update_file_recipe(&self, sealed: Vec<u8>) -> Result<()> {
        self.inner.update_file_recipe(sealed)
    }

    fn update_delta_index(&self, base: &IndexToken, new: &IndexToken) -> Result<()> {
        self.inner.update_delta_index(base, new)
    }

    fn local_insert(&self, pairs: &[(IndexToken, IndexToken)]) -> Result<()> {
        self.inner.local_insert(pairs)
    }

    fn update_index_store(&self, key: &IndexToken, value: Vec<u8>) -> Result<()> {
        self.inner.update_index_store(key, value)
    }

    fn update_index_sf(&self, feature: &IndexToken, fingerprint: &IndexToken) -> Result<()> {
        self.inner.update_index_sf(feature, fingerprint)
    }

    fn run_offline(&self, update: bool) -> Result<OfflineOutcome> {
        self.inner.run_offline(update)
    }
}
