mod defaults;
mod types;
mod validate;

use std::path::Path;

use tracing::debug;

pub use self::types::*;
use crate::error::{Result, SealdupError};

/// Smallest chunk the engine accepts as a configured maximum. Anything
/// smaller leaves no room for the similarity window.
pub const MIN_CHUNK_SIZE_LIMIT: u32 = 64;

/// Largest supported chunk; a 31-bit delta instruction length must cover it.
pub const MAX_CHUNK_SIZE_LIMIT: u32 = 1024 * 1024;

impl EngineConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(raw).map_err(|e| SealdupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Load and validate the engine configuration at `path`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SealdupError::Config(format!("cannot read config '{}': {e}", path.display()))
    })?;
    let config = EngineConfig::from_yaml_str(&raw)?;
    debug!(path = %path.display(), variant = %config.index.variant, "loaded engine config");
    Ok(config)
}
