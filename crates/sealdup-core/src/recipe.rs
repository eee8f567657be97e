use sealdup_types::IndexRecord;

use crate::error::{Result, SealdupError};

/// File recipe entries buffered in arrival order until a flush.
#[derive(Debug)]
pub struct RecipeBuffer {
    entries: Vec<IndexRecord>,
    flush_at: usize,
    sequence: u64,
}

/// One serialized recipe batch. `sequence` numbers batches within a
/// session and is bound into the seal so batches cannot be reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeBatch {
    pub sequence: u64,
    pub entries: usize,
    pub bytes: Vec<u8>,
}

impl RecipeBatch {
    /// AAD context for sealing this batch.
    pub fn context(&self) -> [u8; 8] {
        self.sequence.to_le_bytes()
    }
}

impl RecipeBuffer {
    pub fn new(flush_at: usize) -> Self {
        Self {
            entries: Vec::with_capacity(flush_at),
            flush_at: flush_at.max(1),
            sequence: 0,
        }
    }

    /// Append an entry. Returns true once the buffer should be flushed.
    pub fn push(&mut self, entry: IndexRecord) -> bool {
        self.entries.push(entry);
        self.entries.len() >= self.flush_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize and drain buffered entries as
    /// `[u32 count LE][count * IndexRecord]`. `None` when empty.
    pub fn take_batch(&mut self) -> Option<RecipeBatch> {
        if self.entries.is_empty() {
            return None;
        }
        let mut bytes = Vec::with_capacity(4 + self.entries.len() * IndexRecord::SIZE);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            entry.write_to(&mut bytes);
        }
        let batch = RecipeBatch {
            sequence: self.sequence,
            entries: self.entries.len(),
            bytes,
        };
        self.sequence += 1;
        self.entries.clear();
        Some(batch)
    }
}

/// Parse a serialized recipe batch back into entries.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<IndexRecord>> {
    if bytes.len() < 4 {
        return Err(SealdupError::InvalidFormat("recipe batch truncated".into()));
    }
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&bytes[..4]);
    let count = u32::from_le_bytes(prefix) as usize;
    let body = &bytes[4..];
    if body.len() != count * IndexRecord::SIZE {
        return Err(SealdupError::InvalidFormat(format!(
            "recipe batch claims {count} entries but holds {} bytes",
            body.len()
        )));
    }
    body.chunks_exact(IndexRecord::SIZE)
        .map(IndexRecord::from_bytes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdup_types::{ContainerId, Fingerprint, StorageAddress};

    fn entry(n: u8) -> IndexRecord {
        IndexRecord {
            fingerprint: Fingerprint([n; 32]),
            address: StorageAddress::whole(ContainerId([n; 16]), n as u32, 10),
        }
    }

    #[test]
    fn flush_signal_at_threshold() {
        let mut buf = RecipeBuffer::new(3);
        assert!(!buf.push(entry(1)));
        assert!(!buf.push(entry(2)));
        assert!(buf.push(entry(3)));
    }

    #[test]
    fn take_preserves_order_and_numbers_batches() {
        let mut buf = RecipeBuffer::new(8);
        for n in [3, 1, 2] {
            buf.push(entry(n));
        }
        let first = buf.take_batch().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.entries, 3);
        let parsed = parse_batch(&first.bytes).unwrap();
        assert_eq!(parsed, vec![entry(3), entry(1), entry(2)]);

        assert!(buf.take_batch().is_none());
        buf.push(entry(4));
        assert_eq!(buf.take_batch().unwrap().sequence, 1);
    }

    #[test]
    fn parse_rejects_inconsistent_count() {
        let mut buf = RecipeBuffer::new(8);
        buf.push(entry(1));
        let mut bytes = buf.take_batch().unwrap().bytes;
        bytes[0] = 2;
        assert!(parse_batch(&bytes).is_err());
        assert!(parse_batch(&[1, 0]).is_err());
    }
}
