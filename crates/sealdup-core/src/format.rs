use crate::crypto::CryptoEngine;
use crate::error::{Result, SealdupError};

/// Domain-separation marker for object identity binding in AEAD AAD.
const OBJECT_CONTEXT_AAD_PREFIX: &[u8] = b"sealdup:object-context:v1\0";

/// Type tags for sealed objects that leave the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    ChunkData = 0,
    DeltaData = 1,
    IndexValue = 2,
    Recipe = 3,
    EngineState = 4,
}

impl ObjectType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::ChunkData),
            1 => Ok(Self::DeltaData),
            2 => Ok(Self::IndexValue),
            3 => Ok(Self::Recipe),
            4 => Ok(Self::EngineState),
            _ => Err(SealdupError::UnknownObjectType(v)),
        }
    }
}

fn contextual_aad(tag: u8, context: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + OBJECT_CONTEXT_AAD_PREFIX.len() + context.len());
    aad.push(tag);
    aad.extend_from_slice(OBJECT_CONTEXT_AAD_PREFIX);
    aad.extend_from_slice(context);
    aad
}

/// Seal a payload and bind it to `context` (usually the fingerprint the
/// object belongs to).
///
/// Wire format: `[1-byte type_tag][encrypted_blob]`
///   where encrypted_blob = `[12-byte nonce][ciphertext + 16-byte GCM tag]`
pub fn seal(
    obj_type: ObjectType,
    context: &[u8],
    plaintext: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let tag = obj_type as u8;
    let encrypted = crypto.encrypt(plaintext, &contextual_aad(tag, context))?;
    let mut out = Vec::with_capacity(1 + encrypted.len());
    out.push(tag);
    out.extend_from_slice(&encrypted);
    Ok(out)
}

/// Open a sealed object, ensuring its type tag matches.
pub fn unseal(
    data: &[u8],
    expected_type: ObjectType,
    context: &[u8],
    crypto: &dyn CryptoEngine,
) -> Result<Vec<u8>> {
    let Some((&tag, encrypted)) = data.split_first() else {
        return Err(SealdupError::InvalidFormat("empty object".into()));
    };
    let obj_type = ObjectType::from_u8(tag)?;
    // Authenticate before trusting the tag.
    let plaintext = crypto.decrypt(encrypted, &contextual_aad(tag, context))?;
    if obj_type != expected_type {
        return Err(SealdupError::InvalidFormat(format!(
            "unexpected object type: expected {expected_type:?}, got {obj_type:?}"
        )));
    }
    Ok(plaintext)
}
