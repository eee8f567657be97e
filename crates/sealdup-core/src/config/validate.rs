use super::types::EngineConfig;
use super::{MAX_CHUNK_SIZE_LIMIT, MIN_CHUNK_SIZE_LIMIT};
use crate::error::{Result, SealdupError};

/// Per-record framing inside a container plus AEAD overhead.
const CONTAINER_RECORD_OVERHEAD: usize = 4 + 1 + 12 + 16 + 1;

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let index = &self.index;
        if index.top_k == 0 {
            return Err(SealdupError::Config(
                "index.top_k must be at least 1".into(),
            ));
        }
        if !(1..=1 << 26).contains(&index.sketch_width) {
            return Err(SealdupError::Config(format!(
                "index.sketch_width must be in [1, {}], got {}",
                1 << 26,
                index.sketch_width
            )));
        }
        if !(1..=16).contains(&index.sketch_depth) {
            return Err(SealdupError::Config(format!(
                "index.sketch_depth must be in [1, 16], got {}",
                index.sketch_depth
            )));
        }

        let batch = &self.batch;
        if !(MIN_CHUNK_SIZE_LIMIT..=MAX_CHUNK_SIZE_LIMIT).contains(&batch.max_chunk_size) {
            return Err(SealdupError::Config(format!(
                "batch.max_chunk_size must be in [{MIN_CHUNK_SIZE_LIMIT}, {MAX_CHUNK_SIZE_LIMIT}], got {}",
                batch.max_chunk_size
            )));
        }
        if batch.recipe_flush_entries == 0 {
            return Err(SealdupError::Config(
                "batch.recipe_flush_entries must be at least 1".into(),
            ));
        }
        if batch.max_batch_chunks == 0 {
            return Err(SealdupError::Config(
                "batch.max_batch_chunks must be at least 1".into(),
            ));
        }

        let delta = &self.delta;
        for (name, ratio) in [
            ("delta.saturation_ratio", delta.saturation_ratio),
            ("delta.offline_saturation_ratio", delta.offline_saturation_ratio),
        ] {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(SealdupError::Config(format!(
                    "{name} must be a positive number, got {ratio}"
                )));
            }
        }
        if delta.reuse_limit == 0 {
            return Err(SealdupError::Config(
                "delta.reuse_limit must be at least 1".into(),
            ));
        }

        if self.cache.capacity == 0 {
            return Err(SealdupError::Config(
                "cache.capacity must be at least 1".into(),
            ));
        }

        let min_container = batch.max_chunk_size as usize + CONTAINER_RECORD_OVERHEAD;
        if self.container.capacity < min_container {
            return Err(SealdupError::Config(format!(
                "container.capacity must hold at least one maximum-size chunk ({min_container} bytes), got {}",
                self.container.capacity
            )));
        }
        if self.container.capacity > u32::MAX as usize {
            return Err(SealdupError::Config(
                "container.capacity must fit in 32-bit offsets".into(),
            ));
        }

        if !(1..=22).contains(&self.compression.zstd_level) {
            return Err(SealdupError::Config(format!(
                "compression.zstd_level must be in [1, 22], got {}",
                self.compression.zstd_level
            )));
        }
        if !(1..=64).contains(&self.features.threads) {
            return Err(SealdupError::Config(format!(
                "features.threads must be in [1, 64], got {}",
                self.features.threads
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_top_k() {
        let mut config = EngineConfig::default();
        config.index.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_chunk_size() {
        let mut config = EngineConfig::default();
        config.batch.max_chunk_size = 16;
        assert!(config.validate().is_err());
        config.batch.max_chunk_size = MAX_CHUNK_SIZE_LIMIT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_container_smaller_than_chunk() {
        let mut config = EngineConfig::default();
        config.container.capacity = config.batch.max_chunk_size as usize;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("container.capacity"));
    }

    #[test]
    fn rejects_non_positive_ratio() {
        let mut config = EngineConfig::default();
        config.delta.saturation_ratio = 0.0;
        assert!(config.validate().is_err());
        config.delta.saturation_ratio = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_thread_count() {
        let mut config = EngineConfig::default();
        config.features.threads = 0;
        assert!(config.validate().is_err());
    }
}
