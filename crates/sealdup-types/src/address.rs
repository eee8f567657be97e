use serde::{Deserialize, Serialize};

use crate::container_id::{ContainerId, CONTAINER_ID_SIZE};
use crate::error::{Result, SealdupError};
use crate::fingerprint::{Fingerprint, FINGERPRINT_SIZE};

const FLAG_DELTA: u8 = 0x01;

/// Location of a stored chunk inside a container.
///
/// Encoded as a fixed 57-byte little-endian record:
/// `[container 16][offset u32][length u32][flags u8][base fingerprint 32]`.
/// `base` is meaningful only when `delta` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StorageAddress {
    pub container: ContainerId,
    pub offset: u32,
    pub length: u32,
    pub delta: bool,
    pub base: Fingerprint,
}

impl StorageAddress {
    pub const SIZE: usize = CONTAINER_ID_SIZE + 4 + 4 + 1 + FINGERPRINT_SIZE;

    pub fn whole(container: ContainerId, offset: u32, length: u32) -> Self {
        Self {
            container,
            offset,
            length,
            delta: false,
            base: Fingerprint::default(),
        }
    }

    pub fn delta(container: ContainerId, offset: u32, length: u32, base: Fingerprint) -> Self {
        Self {
            container,
            offset,
            length,
            delta: true,
            base,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.container.as_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.push(if self.delta { FLAG_DELTA } else { 0 });
        out.extend_from_slice(self.base.as_bytes());
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut buf);
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(SealdupError::InvalidFormat(format!(
                "storage address must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let mut container = [0u8; CONTAINER_ID_SIZE];
        container.copy_from_slice(&data[..CONTAINER_ID_SIZE]);
        let mut pos = CONTAINER_ID_SIZE;
        let offset = read_u32(data, pos);
        pos += 4;
        let length = read_u32(data, pos);
        pos += 4;
        let flags = data[pos];
        pos += 1;
        if flags & !FLAG_DELTA != 0 {
            return Err(SealdupError::InvalidFormat(format!(
                "unknown storage address flags: {flags:#04x}"
            )));
        }
        let mut base = [0u8; FINGERPRINT_SIZE];
        base.copy_from_slice(&data[pos..pos + FINGERPRINT_SIZE]);
        Ok(Self {
            container: ContainerId(container),
            offset,
            length,
            delta: flags & FLAG_DELTA != 0,
            base: Fingerprint(base),
        })
    }
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[pos..pos + 4]);
    u32::from_le_bytes(word)
}

/// A fingerprint paired with the address of its stored content.
///
/// This is the fixed 89-byte record shape used for index values and file
/// recipe entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub fingerprint: Fingerprint,
    pub address: StorageAddress,
}

impl IndexRecord {
    pub const SIZE: usize = FINGERPRINT_SIZE + StorageAddress::SIZE;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.fingerprint.as_bytes());
        self.address.write_to(out);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(SealdupError::InvalidFormat(format!(
                "index record must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let (fp, addr) = data.split_at(FINGERPRINT_SIZE);
        Ok(Self {
            fingerprint: Fingerprint::from_slice(fp)
                .ok_or_else(|| SealdupError::InvalidFormat("bad fingerprint".into()))?,
            address: StorageAddress::from_bytes(addr)?,
        })
    }
}
