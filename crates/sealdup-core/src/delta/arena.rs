use std::collections::HashMap;

/// One indexed sub-chunk of the base buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubChunk {
    pub offset: usize,
    pub len: usize,
    pub hash: u64,
    /// Older record with the same hash.
    next: Option<u32>,
}

/// Records for one encode call, addressed by index. Buckets hold the index
/// of the newest record for a hash; older ones are reached through `next`.
#[derive(Debug, Default)]
pub(crate) struct SubChunkArena {
    records: Vec<SubChunk>,
    heads: HashMap<u64, u32>,
}

impl SubChunkArena {
    pub fn reset(&mut self) {
        self.records.clear();
        self.heads.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn insert(&mut self, offset: usize, len: usize, hash: u64) {
        let index = self.records.len() as u32;
        let next = self.heads.insert(hash, index);
        self.records.push(SubChunk {
            offset,
            len,
            hash,
            next,
        });
    }

    /// All records with `hash`, newest first.
    pub fn bucket(&self, hash: u64) -> Bucket<'_> {
        Bucket {
            arena: self,
            cursor: self.heads.get(&hash).copied(),
        }
    }
}

pub(crate) struct Bucket<'a> {
    arena: &'a SubChunkArena,
    cursor: Option<u32>,
}

impl<'a> Iterator for Bucket<'a> {
    type Item = &'a SubChunk;

    fn next(&mut self) -> Option<&'a SubChunk> {
        let record = self.arena.records.get(self.cursor? as usize)?;
        self.cursor = record.next;
        Some(record)
    }
}
