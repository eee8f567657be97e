use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use sealdup_types::Fingerprint;

/// Fingerprint -> position of its first occurrence in the current batch.
#[derive(Debug, Default)]
pub struct BatchLocalIndex {
    positions: HashMap<Fingerprint, usize>,
}

impl BatchLocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<usize> {
        self.positions.get(fp).copied()
    }

    /// Record the first occurrence of `fp`; later calls for the same key
    /// keep the original position.
    pub fn record(&mut self, fp: Fingerprint, position: usize) {
        self.positions.entry(fp).or_insert(position);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    /// Borrow the index for one batch. It is cleared when the scope drops,
    /// on success and on every error path.
    pub fn scope(&mut self) -> BatchScope<'_> {
        BatchScope { index: self }
    }
}

/// RAII guard returned by [`BatchLocalIndex::scope`].
pub struct BatchScope<'a> {
    index: &'a mut BatchLocalIndex,
}

impl Deref for BatchScope<'_> {
    type Target = BatchLocalIndex;

    fn deref(&self) -> &BatchLocalIndex {
        self.index
    }
}

impl DerefMut for BatchScope<'_> {
    fn deref_mut(&mut self) -> &mut BatchLocalIndex {
        self.index
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        self.index.clear();
    }
}
