use sealdup_types::{Fingerprint, IndexRecord};

use super::context::EngineContext;
use crate::buffer::BufferPool;
use crate::compress::decompress;
use crate::error::{Result, SealdupError};
use crate::format::{seal, unseal, ObjectType};

/// AAD context of sealed index values. The record carries its own
/// fingerprint, which readers check against the key they asked for.
const INDEX_VALUE_CONTEXT: &[u8] = b"index-record";

pub(crate) fn seal_index_record(
    ctx: &EngineContext,
    scratch: &std::sync::Arc<BufferPool>,
    record: &IndexRecord,
) -> Result<Vec<u8>> {
    let mut buf = scratch.checkout();
    record.write_to(buf.as_mut_vec());
    seal(ObjectType::IndexValue, INDEX_VALUE_CONTEXT, buf.as_slice(), ctx.crypto())
}

pub(crate) fn open_index_record(ctx: &EngineContext, sealed: &[u8]) -> Result<IndexRecord> {
    let plain = unseal(sealed, ObjectType::IndexValue, INDEX_VALUE_CONTEXT, ctx.crypto())?;
    IndexRecord::from_bytes(&plain)
}

/// Open a sealed whole-chunk record and check it against `fingerprint`.
pub(crate) fn open_chunk(
    ctx: &EngineContext,
    sealed: &[u8],
    fingerprint: &Fingerprint,
) -> Result<Vec<u8>> {
    let payload = unseal(sealed, ObjectType::ChunkData, fingerprint.as_bytes(), ctx.crypto())?;
    let content = decompress(&payload, None)?;
    verify(ctx, &content, fingerprint)?;
    Ok(content)
}

pub(crate) fn verify(ctx: &EngineContext, content: &[u8], fingerprint: &Fingerprint) -> Result<()> {
    if ctx.keys().fingerprint(content) != *fingerprint {
        return Err(SealdupError::InvalidFormat(format!(
            "content of {} bytes does not match fingerprint {fingerprint}",
            content.len()
        )));
    }
    Ok(())
}
