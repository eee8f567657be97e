use super::types::{CompressionAlgorithm, IndexVariant};

pub(super) fn default_variant() -> IndexVariant {
    IndexVariant::Frequency
}

pub(super) fn default_top_k() -> usize {
    64 * 1024
}

pub(super) fn default_sketch_width() -> usize {
    256 * 1024
}

pub(super) fn default_sketch_depth() -> usize {
    4
}

pub(super) fn default_max_chunk_size() -> u32 {
    16 * 1024 // 16 KiB
}

pub(super) fn default_recipe_flush_entries() -> usize {
    256
}

pub(super) fn default_max_batch_chunks() -> usize {
    4096
}

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_saturation_ratio() -> f64 {
    0.5
}

pub(super) fn default_offline_saturation_ratio() -> f64 {
    0.25
}

pub(super) fn default_reuse_limit() -> u32 {
    8
}

pub(super) fn default_max_container_loads() -> usize {
    64
}

pub(super) fn default_cache_capacity() -> usize {
    64
}

pub(super) fn default_container_capacity() -> usize {
    4 * 1024 * 1024 // 4 MiB
}

pub(super) fn default_algorithm() -> CompressionAlgorithm {
    CompressionAlgorithm::Lz4
}

pub(super) fn default_zstd_level() -> i32 {
    3
}

pub(super) fn default_feature_threads() -> usize {
    3
}
