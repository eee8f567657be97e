use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::error::{Result, SealdupError};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub delta: DeltaConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub sealing: SealingConfig,
    /// Where the sketch, Top-K index and stats are persisted across restarts.
    /// `None` keeps all state in memory.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

/// Which dedup/delta pipeline a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IndexVariant {
    /// Frequency-gated index with container-saturation delta selection.
    Frequency,
    /// Frequency-gated index with per-container reuse-count delta selection.
    Mega,
    /// Exact deduplication only, no similarity detection.
    Exact,
}

impl IndexVariant {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "frequency" => Ok(Self::Frequency),
            "mega" => Ok(Self::Mega),
            "exact" => Ok(Self::Exact),
            other => Err(SealdupError::UnknownVariant(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Mega => "mega",
            Self::Exact => "exact",
        }
    }

    pub fn uses_delta(self) -> bool {
        !matches!(self, Self::Exact)
    }
}

impl TryFrom<String> for IndexVariant {
    type Error = SealdupError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<IndexVariant> for String {
    fn from(value: IndexVariant) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IndexVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_variant")]
    pub variant: IndexVariant,
    /// Capacity of the in-boundary popularity index.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_sketch_width")]
    pub sketch_width: usize,
    #[serde(default = "default_sketch_depth")]
    pub sketch_depth: usize,
    /// Skip the offline pass; saturation-skipped pairs are still reported.
    #[serde(default)]
    pub forward_only: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            top_k: default_top_k(),
            sketch_width: default_sketch_width(),
            sketch_depth: default_sketch_depth(),
            forward_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u32,
    /// Recipe entries buffered before one `UpdateFileRecipe` call.
    #[serde(default = "default_recipe_flush_entries")]
    pub recipe_flush_entries: usize,
    #[serde(default = "default_max_batch_chunks")]
    pub max_batch_chunks: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            recipe_flush_entries: default_recipe_flush_entries(),
            max_batch_chunks: default_max_batch_chunks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Distinct containers per batch chunk allowed before delta is skipped
    /// for the rest of the batch (forward-only mode).
    #[serde(default = "default_saturation_ratio")]
    pub saturation_ratio: f64,
    /// Same limit when an offline pass will revisit the skipped chunks.
    #[serde(default = "default_offline_saturation_ratio")]
    pub offline_saturation_ratio: f64,
    /// Use count above which a container stops serving as a delta base for
    /// the rest of the batch.
    #[serde(default = "default_reuse_limit")]
    pub reuse_limit: u32,
    /// Hard cap on `LoadContainer` calls per batch.
    #[serde(default = "default_max_container_loads")]
    pub max_container_loads: usize,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            saturation_ratio: default_saturation_ratio(),
            offline_saturation_ratio: default_offline_saturation_ratio(),
            reuse_limit: default_reuse_limit(),
            max_container_loads: default_max_container_loads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of containers held.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Bytes per container before it is flushed.
    #[serde(default = "default_container_capacity")]
    pub capacity: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            capacity: default_container_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    Lz4,
    Zstd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: CompressionAlgorithm,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            zstd_level: default_zstd_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Worker threads for super-feature extraction (1 = inline).
    #[serde(default = "default_feature_threads")]
    pub threads: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            threads: default_feature_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealingConfig {
    /// Encrypt everything handed to the untrusted store.
    #[serde(default = "default_true")]
    pub encrypt: bool,
}

impl Default for SealingConfig {
    fn default() -> Self {
        Self { encrypt: true }
    }
}
