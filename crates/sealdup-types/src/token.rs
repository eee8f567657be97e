use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fingerprint::Fingerprint;

type KeyedBlake2b256 = Blake2bMac<U32>;

const DOMAIN_FINGERPRINT: u8 = 0x01;
const DOMAIN_SUPER_FEATURE: u8 = 0x02;

/// Deterministic keyed token standing in for a fingerprint or super-feature
/// in every request that leaves the boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexToken(pub [u8; 32]);

impl IndexToken {
    pub fn for_fingerprint(key: &[u8; 32], fp: &Fingerprint) -> Self {
        Self::derive(key, DOMAIN_FINGERPRINT, fp.as_bytes())
    }

    pub fn for_super_feature(key: &[u8; 32], slot: usize, feature: &[u8; 32]) -> Self {
        let mut input = [0u8; 33];
        input[0] = slot as u8;
        input[1..].copy_from_slice(feature);
        Self::derive(key, DOMAIN_SUPER_FEATURE, &input)
    }

    fn derive(key: &[u8; 32], domain: u8, data: &[u8]) -> Self {
        let mut mac = KeyedBlake2b256::new_from_slice(key).expect("valid 32-byte key for BLAKE2b");
        Mac::update(&mut mac, &[domain]);
        Mac::update(&mut mac, data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        IndexToken(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for IndexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexToken({})", &self.to_hex()[..16])
    }
}
