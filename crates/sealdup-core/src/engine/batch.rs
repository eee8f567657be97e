use bytes::Bytes;
use serde::{Deserialize, Serialize};

use sealdup_types::{DedupState, Fingerprint, StorageAddress};

use crate::config::BatchConfig;
use crate::error::{Result, SealdupError};
use crate::stats::EngineStats;

/// Steps of one batch through the pipeline, in order. A session rests in
/// `Idle` between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchPhase {
    Hashing,
    FrequencyUpdate,
    Classification,
    ExternalQuery,
    SimilarityExtraction,
    DeltaSelection,
    Commit,
    TopKRefresh,
    Idle,
}

/// An incoming batch of content-defined chunks.
#[derive(Debug, Clone, Default)]
pub struct ChunkBatch {
    chunks: Vec<Bytes>,
}

impl ChunkBatch {
    /// Build a batch from individual chunks, enforcing the batch limits.
    pub fn from_chunks<I, C>(chunks: I, limits: &BatchConfig) -> Result<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        let batch = Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        };
        batch.check(limits)?;
        Ok(batch)
    }

    /// Split a framed buffer of `[u32 len LE][chunk bytes]` records. The
    /// chunks share `framed`'s allocation.
    pub fn parse(framed: Bytes, limits: &BatchConfig) -> Result<Self> {
        let mut chunks = Vec::new();
        let mut pos = 0usize;
        while pos < framed.len() {
            let Some(prefix) = framed.get(pos..pos + 4) else {
                return Err(SealdupError::InvalidFormat(format!(
                    "truncated chunk length at byte {pos}"
                )));
            };
            let mut len = [0u8; 4];
            len.copy_from_slice(prefix);
            let len = u32::from_le_bytes(len) as usize;
            let start = pos + 4;
            let end = start
                .checked_add(len)
                .filter(|&end| end <= framed.len())
                .ok_or_else(|| {
                    SealdupError::InvalidFormat(format!(
                        "chunk of {len} bytes at byte {pos} overruns the batch"
                    ))
                })?;
            chunks.push(framed.slice(start..end));
            pos = end;
        }
        let batch = Self { chunks };
        batch.check(limits)?;
        Ok(batch)
    }

    fn check(&self, limits: &BatchConfig) -> Result<()> {
        if self.chunks.len() > limits.max_batch_chunks {
            return Err(SealdupError::InvalidFormat(format!(
                "batch of {} chunks exceeds limit of {}",
                self.chunks.len(),
                limits.max_batch_chunks
            )));
        }
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.is_empty() {
                return Err(SealdupError::InvalidFormat(format!("chunk {i} is empty")));
            }
            if chunk.len() > limits.max_chunk_size as usize {
                return Err(SealdupError::InvalidFormat(format!(
                    "chunk {i} is {} bytes, limit is {}",
                    chunk.len(),
                    limits.max_chunk_size
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(|c| c.as_ref())
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }
}

/// Outcome for one chunk, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub fingerprint: Fingerprint,
    pub size: u32,
    /// Estimated frequency at classification time.
    pub frequency: u32,
    pub state: DedupState,
    pub address: StorageAddress,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub records: Vec<ChunkRecord>,
    /// Counters of this batch alone.
    pub stats: EngineStats,
}

impl BatchReport {
    pub fn count(&self, state: DedupState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    pub fn delta_chunks(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == DedupState::Unique && r.address.delta)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailReport {
    /// Recipe entries flushed by the tail call.
    pub recipe_entries: usize,
    /// Containers written by the tail call.
    pub containers_written: usize,
}

#[derive(Debug, Clone, Default)]
pub struct OfflineReport {
    /// Whether the backward-delta update ran, as opposed to only discarding
    /// the deferred pairs.
    pub updated: bool,
    pub pairs_processed: usize,
    /// Engine counters when the pass started.
    pub stats: EngineStats,
}
