use std::sync::Arc;

use bytes::Bytes;

use sealdup_types::{Fingerprint, IndexRecord};

use super::context::EngineContext;
use super::records::{open_chunk, open_index_record, verify};
use crate::boundary::{check_response_len, BoundaryCall, UntrustedStore};
use crate::buffer::BufferPool;
use crate::container::read_record;
use crate::delta::decode_into;
use crate::error::{Result, SealdupError};
use crate::format::{unseal, ObjectType};
use crate::recipe::parse_batch;

/// Rebuilds stored chunks from recipe entries.
pub struct ChunkReader {
    ctx: Arc<EngineContext>,
    store: Arc<dyn UntrustedStore>,
    scratch: Arc<BufferPool>,
}

impl ChunkReader {
    pub fn new(ctx: Arc<EngineContext>, store: Arc<dyn UntrustedStore>) -> Self {
        let capacity = ctx.config().batch.max_chunk_size as usize;
        Self {
            ctx,
            store,
            scratch: Arc::new(BufferPool::new(1, capacity)),
        }
    }

    /// Open the `sequence`-th sealed recipe batch of a session.
    pub fn read_recipe(&self, sealed: &[u8], sequence: u64) -> Result<Vec<IndexRecord>> {
        let plain = unseal(
            sealed,
            ObjectType::Recipe,
            &sequence.to_le_bytes(),
            self.ctx.crypto(),
        )?;
        parse_batch(&plain)
    }

    /// Content of the chunk an index record or recipe entry points at,
    /// checked against its fingerprint.
    pub fn read_chunk(&self, entry: &IndexRecord) -> Result<Vec<u8>> {
        let addr = &entry.address;
        let container = self.container(entry)?;
        let record = read_record(&container, addr.offset, addr.length)?;
        if !addr.delta {
            return open_chunk(&self.ctx, record, &entry.fingerprint);
        }

        let stream = unseal(
            record,
            ObjectType::DeltaData,
            entry.fingerprint.as_bytes(),
            self.ctx.crypto(),
        )?;
        let base_entry = self.lookup(&addr.base)?;
        if base_entry.address.delta {
            return Err(SealdupError::InvalidFormat(format!(
                "delta base {} is itself a delta",
                addr.base
            )));
        }
        let base = self.read_chunk(&base_entry)?;

        let mut out = self.scratch.checkout();
        decode_into(&stream, &base, out.as_mut_vec())?;
        verify(&self.ctx, out.as_slice(), &entry.fingerprint)?;
        Ok(out.as_slice().to_vec())
    }

    /// Index record of a stored chunk.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<IndexRecord> {
        let token = self.ctx.keys().token(fingerprint);
        let mut replies = self.store.query_index(&[token])?;
        check_response_len(BoundaryCall::QueryIndex, &replies, 1)?;
        let Some(sealed) = replies.pop().flatten() else {
            return Err(SealdupError::InvalidFormat(format!(
                "chunk {fingerprint} is not in the index"
            )));
        };
        let record = open_index_record(&self.ctx, &sealed)?;
        if record.fingerprint != *fingerprint {
            return Err(SealdupError::InvalidFormat(format!(
                "index answered {} for {fingerprint}",
                record.fingerprint
            )));
        }
        Ok(record)
    }

    fn container(&self, entry: &IndexRecord) -> Result<Bytes> {
        let id = &entry.address.container;
        if let Some(bytes) = self.ctx.cache.lock().unwrap().read(id) {
            return Ok(bytes);
        }
        match self.store.load_container(id)? {
            Some(raw) => Ok(Bytes::from(raw)),
            None => Err(SealdupError::InvalidFormat(format!(
                "container {id} holding {} is missing",
                entry.fingerprint
            ))),
        }
    }
}
