use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::config::CompressionAlgorithm;
use crate::error::{Result, SealdupError};

const TAG_NONE: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;
const TAG_ZSTD: u8 = 0x02;

/// Maximum decompressed output size. Stored chunks are bounded by the
/// configured maximum chunk size, so anything past this is corruption.
const MAX_DECOMPRESS_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Compression {
    None,
    #[default]
    Lz4,
    Zstd {
        level: i32,
    },
}

impl Compression {
    pub fn from_algorithm(algorithm: CompressionAlgorithm, zstd_level: i32) -> Self {
        match algorithm {
            CompressionAlgorithm::None => Compression::None,
            CompressionAlgorithm::Lz4 => Compression::Lz4,
            CompressionAlgorithm::Zstd => Compression::Zstd { level: zstd_level },
        }
    }
}

/// Compress data and prepend a 1-byte tag identifying the codec.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(store_raw(data)),
        Compression::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_LZ4);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
        Compression::Zstd { level } => {
            let compressed = zstd::bulk::compress(data, level)
                .map_err(|e| SealdupError::Other(format!("zstd compress: {e}")))?;
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(TAG_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
    }
}

/// Compress, keeping the result only when it is smaller than storing the
/// bytes raw.
pub fn compress_if_smaller(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    if compression == Compression::None {
        return Ok(store_raw(data));
    }
    let packed = compress(compression, data)?;
    if packed.len() < data.len() + 1 {
        Ok(packed)
    } else {
        Ok(store_raw(data))
    }
}

fn store_raw(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + data.len());
    out.push(TAG_NONE);
    out.extend_from_slice(data);
    out
}

/// Decompress data by reading the 1-byte tag prefix and dispatching.
///
/// `expected_size` only sizes the output buffer; the hard limit still applies.
pub fn decompress(data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(SealdupError::Decompression("empty data".into()));
    }
    let tag = data[0];
    let payload = &data[1..];
    match tag {
        TAG_NONE => Ok(payload.to_vec()),
        TAG_LZ4 => {
            if payload.len() < 4 {
                return Err(SealdupError::Decompression("lz4: payload too short".into()));
            }
            let mut prefix = [0u8; 4];
            prefix.copy_from_slice(&payload[..4]);
            let uncompressed_size = u32::from_le_bytes(prefix) as u64;
            if uncompressed_size > MAX_DECOMPRESS_SIZE {
                return Err(SealdupError::Decompression(format!(
                    "lz4: decompressed size ({uncompressed_size}) exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| SealdupError::Decompression(format!("lz4: {e}")))
        }
        TAG_ZSTD => {
            let mut decoder = zstd::stream::Decoder::new(std::io::Cursor::new(payload))
                .map_err(|e| SealdupError::Decompression(format!("zstd init: {e}")))?;
            let capacity = expected_size
                .unwrap_or(0)
                .min(MAX_DECOMPRESS_SIZE as usize);
            let mut output = Vec::with_capacity(capacity);
            decoder
                .by_ref()
                .take(MAX_DECOMPRESS_SIZE + 1)
                .read_to_end(&mut output)
                .map_err(|e| SealdupError::Decompression(format!("zstd: {e}")))?;
            if output.len() as u64 > MAX_DECOMPRESS_SIZE {
                return Err(SealdupError::Decompression(format!(
                    "zstd: decompressed size exceeds limit of {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            Ok(output)
        }
        _ => Err(SealdupError::UnknownCompressionTag(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompress_rejects_lz4_bomb() {
        let mut data = vec![TAG_LZ4];
        data.extend_from_slice(&(1u32 << 30).to_le_bytes());
        data.extend_from_slice(&[0u8; 10]);
        assert!(decompress(&data, None).is_err());
    }

    #[test]
    fn decompress_rejects_unknown_tag() {
        assert!(matches!(
            decompress(&[0x7F, 1, 2], None),
            Err(SealdupError::UnknownCompressionTag(0x7F))
        ));
    }

    #[test]
    fn roundtrip_all_codecs() {
        let payload = b"a chunk body that repeats, a chunk body that repeats".to_vec();
        for codec in [
            Compression::None,
            Compression::Lz4,
            Compression::Zstd { level: 3 },
        ] {
            let encoded = compress(codec, &payload).unwrap();
            assert_eq!(decompress(&encoded, Some(payload.len())).unwrap(), payload);
        }
    }

    #[test]
    fn incompressible_data_is_stored_raw() {
        let noise: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let encoded = compress_if_smaller(Compression::Lz4, &noise).unwrap();
        assert_eq!(encoded[0], TAG_NONE);
        assert_eq!(encoded.len(), noise.len() + 1);
        assert_eq!(decompress(&encoded, None).unwrap(), noise);
    }

    #[test]
    fn compressible_data_keeps_codec() {
        let zeros = vec![0u8; 8192];
        let encoded = compress_if_smaller(Compression::Lz4, &zeros).unwrap();
        assert_eq!(encoded[0], TAG_LZ4);
        assert!(encoded.len() < zeros.len());
    }
}
