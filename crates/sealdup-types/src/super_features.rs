use serde::{Deserialize, Serialize};

/// Number of super-features per chunk.
pub const SF_NUM: usize = 3;

/// Size in bytes of one super-feature digest.
pub const SUPER_FEATURE_SIZE: usize = 32;

/// Locality-sensitive digests of a chunk; two chunks sharing any one of
/// them are treated as similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SuperFeatures(pub [[u8; SUPER_FEATURE_SIZE]; SF_NUM]);

impl SuperFeatures {
    pub fn iter(&self) -> impl Iterator<Item = &[u8; SUPER_FEATURE_SIZE]> {
        self.0.iter()
    }
}
