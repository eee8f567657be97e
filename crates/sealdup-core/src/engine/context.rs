use std::sync::Mutex;

use tracing::info;

use crate::cache::ContainerCache;
use crate::compress::Compression;
use crate::config::EngineConfig;
use crate::crypto::keys::EngineKeys;
use crate::crypto::CryptoEngine;
use crate::error::Result;
use crate::features::FeatureExtractor;
use crate::index::TopKIndex;
use crate::persist::{load_state, save_state, PersistedState};
use crate::policy::SelectionPolicy;
use crate::sketch::FrequencySketch;
use crate::stats::EngineStats;

/// State shared by every session of one engine.
///
/// The sketch, the Top-K index, the container cache and the statistics each
/// sit behind their own lock, held for one logical operation at a time.
/// Sessions hold the context through an `Arc`.
pub struct EngineContext {
    config: EngineConfig,
    keys: EngineKeys,
    crypto: Box<dyn CryptoEngine>,
    compression: Compression,
    policy: Option<SelectionPolicy>,
    features: FeatureExtractor,
    pub(crate) sketch: Mutex<FrequencySketch>,
    pub(crate) top_k: Mutex<TopKIndex>,
    pub(crate) cache: Mutex<ContainerCache>,
    pub(crate) stats: Mutex<EngineStats>,
}

impl EngineContext {
    /// Validate `config`, build the shared structures and restore persisted
    /// state when `state_path` points at an existing file.
    pub fn init(config: EngineConfig, keys: EngineKeys) -> Result<Self> {
        config.validate()?;
        let crypto = keys.data_engine(config.sealing.encrypt);
        let index = &config.index;

        let mut sketch = FrequencySketch::new(index.sketch_depth, index.sketch_width);
        let mut top_k = TopKIndex::new(index.top_k);
        let mut stats = EngineStats::default();
        if let Some(path) = &config.state_path {
            if let Some(state) =
                load_state(path, index.sketch_depth, index.sketch_width, crypto.as_ref())?
            {
                sketch = state.sketch;
                for (fp, entry) in state.top_k {
                    top_k.add(fp, entry);
                }
                stats = state.stats;
            }
        }

        let policy = SelectionPolicy::for_variant(index.variant, &config.delta, index.forward_only);
        let features = FeatureExtractor::new(config.features.threads)?;
        let compression =
            Compression::from_algorithm(config.compression.algorithm, config.compression.zstd_level);

        info!(
            variant = %index.variant,
            top_k = top_k.len(),
            top_k_capacity = top_k.capacity(),
            delta = policy.is_some(),
            encrypted = crypto.is_encrypting(),
            "engine initialized"
        );

        Ok(Self {
            cache: Mutex::new(ContainerCache::new(config.cache.capacity)),
            config,
            keys,
            crypto,
            compression,
            policy,
            features,
            sketch: Mutex::new(sketch),
            top_k: Mutex::new(top_k),
            stats: Mutex::new(stats),
        })
    }

    /// Persist the sketch, Top-K entries and statistics. A no-op without a
    /// configured `state_path`.
    pub fn teardown(&self) -> Result<()> {
        let Some(path) = &self.config.state_path else {
            info!("engine teardown, no state path configured");
            return Ok(());
        };
        let state = self.snapshot();
        save_state(path, &state, self.crypto.as_ref())?;
        info!(
            batches = state.stats.batches,
            top_k = state.top_k.len(),
            "engine teardown complete"
        );
        Ok(())
    }

    /// Consistent copy of the persistable state. Locks are taken one after
    /// another in the pipeline's order (sketch, Top-K, stats).
    pub fn snapshot(&self) -> PersistedState {
        let sketch = self.sketch.lock().unwrap().clone();
        let top_k = self
            .top_k
            .lock()
            .unwrap()
            .iter()
            .map(|(fp, entry)| (*fp, *entry))
            .collect();
        let stats = self.stats.lock().unwrap().clone();
        PersistedState {
            sketch,
            top_k,
            stats,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn keys(&self) -> &EngineKeys {
        &self.keys
    }

    pub fn crypto(&self) -> &dyn CryptoEngine {
        self.crypto.as_ref()
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Delta selection policy of the configured variant, `None` when the
    /// engine never deltas.
    pub fn policy(&self) -> Option<SelectionPolicy> {
        self.policy
    }

    pub fn features(&self) -> &FeatureExtractor {
        &self.features
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn top_k_len(&self) -> usize {
        self.top_k.lock().unwrap().len()
    }

    pub fn cached_containers(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}
