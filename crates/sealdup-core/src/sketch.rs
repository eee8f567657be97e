use sealdup_types::Fingerprint;

use crate::error::{Result, SealdupError};
use crate::hash::{mix64, splitmix64};

const ROW_SEED: u64 = 0x5EA1_D0B5_C0FF_EE01;

/// Count-Min sketch over chunk fingerprints.
///
/// Every row holds `width` saturating `u32` counters. `estimate` never
/// reports less than the number of `update` calls for a fingerprint; hash
/// collisions can only push it higher.
#[derive(Debug, Clone)]
pub struct FrequencySketch {
    depth: usize,
    width: usize,
    seeds: Vec<u64>,
    counters: Vec<u32>,
}

impl FrequencySketch {
    pub fn new(depth: usize, width: usize) -> Self {
        let mut state = ROW_SEED;
        let seeds = (0..depth).map(|_| splitmix64(&mut state)).collect();
        Self {
            depth,
            width,
            seeds,
            counters: vec![0; depth * width],
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    fn slot(&self, row: usize, fp: &Fingerprint) -> usize {
        let bytes = fp.as_bytes();
        let mut hi = [0u8; 8];
        hi.copy_from_slice(&bytes[8..16]);
        let mut h = fp.low_word() ^ self.seeds[row];
        h = mix64(h).wrapping_add(u64::from_le_bytes(hi));
        row * self.width + (mix64(h) % self.width as u64) as usize
    }

    pub fn update(&mut self, fp: &Fingerprint) {
        for row in 0..self.depth {
            let slot = self.slot(row, fp);
            self.counters[slot] = self.counters[slot].saturating_add(1);
        }
    }

    pub fn estimate(&self, fp: &Fingerprint) -> u32 {
        (0..self.depth)
            .map(|row| self.counters[self.slot(row, fp)])
            .min()
            .unwrap_or(0)
    }

    /// Count one observation and return the resulting estimate.
    pub fn observe(&mut self, fp: &Fingerprint) -> u32 {
        let mut min = u32::MAX;
        for row in 0..self.depth {
            let slot = self.slot(row, fp);
            let counter = self.counters[slot].saturating_add(1);
            self.counters[slot] = counter;
            min = min.min(counter);
        }
        if self.depth == 0 {
            0
        } else {
            min
        }
    }

    /// Serialize as `[u32 depth][u32 width][depth * width u32 counters]`.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.counters.len() * 4);
        out.extend_from_slice(&(self.depth as u32).to_le_bytes());
        out.extend_from_slice(&(self.width as u32).to_le_bytes());
        for counter in &self.counters {
            out.extend_from_slice(&counter.to_le_bytes());
        }
        out
    }

    /// Restore a sketch written by `to_blob`. The dimensions must match the
    /// configured ones; a resized sketch would silently forget every count.
    pub fn from_blob(blob: &[u8], depth: usize, width: usize) -> Result<Self> {
        if blob.len() < 8 {
            return Err(SealdupError::Persistence("sketch blob truncated".into()));
        }
        let stored_depth = read_u32(blob, 0) as usize;
        let stored_width = read_u32(blob, 4) as usize;
        if stored_depth != depth || stored_width != width {
            return Err(SealdupError::Persistence(format!(
                "sketch dimensions {stored_depth}x{stored_width} do not match configured {depth}x{width}"
            )));
        }
        let expected = 8 + depth * width * 4;
        if blob.len() != expected {
            return Err(SealdupError::Persistence(format!(
                "sketch blob is {} bytes, expected {expected}",
                blob.len()
            )));
        }
        let mut sketch = Self::new(depth, width);
        for (i, counter) in sketch.counters.iter_mut().enumerate() {
            *counter = read_u32(blob, 8 + i * 4);
        }
        Ok(sketch)
    }
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[pos..pos + 4]);
    u32::from_le_bytes(word)
}
