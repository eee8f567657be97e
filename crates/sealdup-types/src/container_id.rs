use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CONTAINER_ID_SIZE: usize = 16;

/// Opaque identifier of a storage container (random).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContainerId(pub [u8; CONTAINER_ID_SIZE]);

impl ContainerId {
    pub fn generate() -> Self {
        let mut buf = [0u8; CONTAINER_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut buf);
        ContainerId(buf)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a ContainerId from a 32-character hex string.
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        if bytes.len() != CONTAINER_ID_SIZE {
            return Err(format!(
                "expected {CONTAINER_ID_SIZE} bytes, got {}",
                bytes.len()
            ));
        }
        let mut arr = [0u8; CONTAINER_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(ContainerId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; CONTAINER_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.to_hex())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_random() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
    }

    #[test]
    fn hex_roundtrip() {
        let id = ContainerId::generate();
        assert_eq!(ContainerId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(ContainerId::from_hex("abcd").is_err());
        assert!(ContainerId::from_hex("zz").is_err());
    }
}
