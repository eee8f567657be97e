use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sealdup_types::{Fingerprint, IndexToken, SuperFeatures, SF_NUM};

use super::aes_gcm::Aes256GcmEngine;
use super::{CryptoEngine, PlaintextEngine};

/// Key material held inside the boundary for the lifetime of the engine.
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EngineKeys {
    /// Seals stored chunks, index values and the persisted state.
    pub data_key: [u8; 32],
    /// Keys the chunk fingerprint MAC.
    pub fingerprint_key: [u8; 32],
    /// Keys the tokens that stand in for fingerprints outside the boundary.
    pub index_key: [u8; 32],
}

impl EngineKeys {
    /// Generate fresh keys from OS entropy.
    pub fn generate() -> Self {
        let mut keys = Self {
            data_key: [0u8; 32],
            fingerprint_key: [0u8; 32],
            index_key: [0u8; 32],
        };
        rand::rngs::OsRng.fill_bytes(&mut keys.data_key);
        rand::rngs::OsRng.fill_bytes(&mut keys.fingerprint_key);
        rand::rngs::OsRng.fill_bytes(&mut keys.index_key);
        keys
    }

    pub fn fingerprint(&self, data: &[u8]) -> Fingerprint {
        Fingerprint::compute(&self.fingerprint_key, data)
    }

    pub fn token(&self, fp: &Fingerprint) -> IndexToken {
        IndexToken::for_fingerprint(&self.index_key, fp)
    }

    /// One token per super-feature slot.
    pub fn feature_tokens(&self, features: &SuperFeatures) -> [IndexToken; SF_NUM] {
        std::array::from_fn(|slot| {
            IndexToken::for_super_feature(&self.index_key, slot, &features.0[slot])
        })
    }

    /// Build the sealing engine. `encrypt = false` selects the pass-through
    /// engine, which still keeps fingerprints and tokens keyed.
    pub fn data_engine(&self, encrypt: bool) -> Box<dyn CryptoEngine> {
        if encrypt {
            Box::new(Aes256GcmEngine::new(&self.data_key))
        } else {
            Box::new(PlaintextEngine)
        }
    }
}
