//! On-disk state carried across restarts: the frequency sketch, the Top-K
//! entries and the engine statistics.
//!
//! Layout: `[magic 8][u32 version LE][sealed payload]`, payload =
//! `[u64 sketch len][sketch blob][u64 entry count][entries][u32 stats len][stats]`,
//! each entry `[fingerprint 32][address 57][u32 frequency]`.

use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use sealdup_types::{Fingerprint, StorageAddress, FINGERPRINT_SIZE};

use crate::crypto::CryptoEngine;
use crate::error::{Result, SealdupError};
use crate::format::{seal, unseal, ObjectType};
use crate::index::TopKEntry;
use crate::sketch::FrequencySketch;
use crate::stats::EngineStats;

/// Magic bytes at the start of the state file.
const MAGIC: &[u8; 8] = b"SDSTATE\0";

/// Current format version.
const VERSION: u32 = 1;

const HEADER_SIZE: usize = 12;

const ENTRY_SIZE: usize = FINGERPRINT_SIZE + StorageAddress::SIZE + 4;

/// AAD context of the sealed payload.
const STATE_CONTEXT: &[u8] = b"engine-state";

#[derive(Debug, Clone)]
pub struct PersistedState {
    pub sketch: FrequencySketch,
    pub top_k: Vec<(Fingerprint, TopKEntry)>,
    pub stats: EngineStats,
}

/// Write state atomically via temp-file + rename.
pub fn save_state(path: &Path, state: &PersistedState, crypto: &dyn CryptoEngine) -> Result<()> {
    let payload = encode_payload(state)?;
    let sealed = seal(ObjectType::EngineState, STATE_CONTEXT, &payload, crypto)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    let file = std::fs::File::create(&tmp_path)?;
    let mut w = BufWriter::new(file);
    w.write_all(MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&sealed)?;
    w.flush()?;
    drop(w);

    std::fs::rename(&tmp_path, path)?;

    info!(
        top_k = state.top_k.len(),
        bytes = HEADER_SIZE + sealed.len(),
        path = %path.display(),
        "persisted engine state"
    );
    Ok(())
}

/// Read state written by [`save_state`]. `Ok(None)` if the file does not
/// exist; any other failure, including a sketch whose dimensions differ
/// from `depth` x `width`, is an error.
pub fn load_state(
    path: &Path,
    depth: usize,
    width: usize,
    crypto: &dyn CryptoEngine,
) -> Result<Option<PersistedState>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no persisted state, starting fresh");
            return Ok(None);
        }
        Err(e) => {
            return Err(SealdupError::Persistence(format!(
                "cannot open {}: {e}",
                path.display()
            )))
        }
    };

    if data.len() < HEADER_SIZE || &data[..8] != MAGIC {
        return Err(SealdupError::Persistence("bad state file magic".into()));
    }
    let version = read_u32(&data, 8)?;
    if version != VERSION {
        return Err(SealdupError::Persistence(format!(
            "unsupported state file version {version}"
        )));
    }
    let payload = unseal(&data[HEADER_SIZE..], ObjectType::EngineState, STATE_CONTEXT, crypto)?;
    let state = decode_payload(&payload, depth, width)?;
    info!(
        top_k = state.top_k.len(),
        path = %path.display(),
        "loaded engine state"
    );
    Ok(Some(state))
}

fn encode_payload(state: &PersistedState) -> Result<Vec<u8>> {
    let sketch = state.sketch.to_blob();
    let stats = rmp_serde::to_vec(&state.stats)?;
    let mut out = Vec::with_capacity(
        8 + sketch.len() + 8 + state.top_k.len() * ENTRY_SIZE + 4 + stats.len(),
    );
    out.extend_from_slice(&(sketch.len() as u64).to_le_bytes());
    out.extend_from_slice(&sketch);
    out.extend_from_slice(&(state.top_k.len() as u64).to_le_bytes());
    for (fp, entry) in &state.top_k {
        out.extend_from_slice(fp.as_bytes());
        entry.address.write_to(&mut out);
        out.extend_from_slice(&entry.frequency.to_le_bytes());
    }
    let stats_len = u32::try_from(stats.len())
        .map_err(|_| SealdupError::Persistence("stats blob too large".into()))?;
    out.extend_from_slice(&stats_len.to_le_bytes());
    out.extend_from_slice(&stats);
    Ok(out)
}

fn decode_payload(payload: &[u8], depth: usize, width: usize) -> Result<PersistedState> {
    let mut pos = 0usize;

    let sketch_len = usize::try_from(read_u64(payload, pos)?)
        .map_err(|_| SealdupError::Persistence("sketch length overflows".into()))?;
    pos += 8;
    let sketch_blob = slice(payload, pos, sketch_len)?;
    pos += sketch_len;
    let sketch = FrequencySketch::from_blob(sketch_blob, depth, width)?;

    let count = usize::try_from(read_u64(payload, pos)?)
        .map_err(|_| SealdupError::Persistence("entry count overflows".into()))?;
    pos += 8;
    let entries_len = count
        .checked_mul(ENTRY_SIZE)
        .ok_or_else(|| SealdupError::Persistence("entry count overflows".into()))?;
    let entries = slice(payload, pos, entries_len)?;
    pos += entries_len;
    let mut top_k = Vec::with_capacity(count);
    for raw in entries.chunks_exact(ENTRY_SIZE) {
        let fp = Fingerprint::from_slice(&raw[..FINGERPRINT_SIZE])
            .ok_or_else(|| SealdupError::Persistence("bad fingerprint".into()))?;
        let addr_end = FINGERPRINT_SIZE + StorageAddress::SIZE;
        let address = StorageAddress::from_bytes(&raw[FINGERPRINT_SIZE..addr_end])?;
        let frequency = read_u32(raw, addr_end)?;
        top_k.push((fp, TopKEntry { address, frequency }));
    }

    let stats_len = read_u32(payload, pos)? as usize;
    pos += 4;
    let stats: EngineStats = rmp_serde::from_slice(slice(payload, pos, stats_len)?)?;
    pos += stats_len;
    if pos != payload.len() {
        return Err(SealdupError::Persistence(format!(
            "{} trailing bytes in state payload",
            payload.len() - pos
        )));
    }

    Ok(PersistedState {
        sketch,
        top_k,
        stats,
    })
}

fn slice(data: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    pos.checked_add(len)
        .and_then(|end| data.get(pos..end))
        .ok_or_else(|| SealdupError::Persistence("state payload truncated".into()))
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice(data, pos, 4)?);
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(data: &[u8], pos: usize) -> Result<u64> {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice(data, pos, 8)?);
    Ok(u64::from_le_bytes(buf))
}
