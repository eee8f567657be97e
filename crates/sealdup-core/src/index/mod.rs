pub mod batch_local;

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use sealdup_types::{Fingerprint, StorageAddress};

/// Metadata kept for a popular chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopKEntry {
    pub address: StorageAddress,
    pub frequency: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    entry: TopKEntry,
    heap_pos: usize,
}

/// Bounded index of the `K` most frequently seen chunks.
///
/// A binary min-heap of fingerprints ordered by `(frequency, fingerprint)`
/// plus a map from fingerprint to entry and heap position. Every mutation
/// keeps both in step, so entries stay addressable by key while the heap
/// root is always the eviction candidate.
#[derive(Debug, Clone)]
pub struct TopKIndex {
    capacity: usize,
    heap: Vec<Fingerprint>,
    slots: HashMap<Fingerprint, Slot>,
}

impl TopKIndex {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            heap: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.slots.contains_key(fp)
    }

    pub fn get(&self, fp: &Fingerprint) -> Option<&StorageAddress> {
        self.slots.get(fp).map(|slot| &slot.entry.address)
    }

    pub fn entry(&self, fp: &Fingerprint) -> Option<&TopKEntry> {
        self.slots.get(fp).map(|slot| &slot.entry)
    }

    /// Minimum frequency held, or 0 while the index still has room.
    pub fn top_frequency(&self) -> u32 {
        if !self.is_full() {
            return 0;
        }
        self.heap
            .first()
            .and_then(|fp| self.slots.get(fp))
            .map_or(0, |slot| slot.entry.frequency)
    }

    pub fn should_admit(&self, frequency: u32) -> bool {
        !self.is_full() || frequency >= self.top_frequency()
    }

    /// Insert or replace an entry, evicting the minimum first when full.
    /// Returns the evicted entry, if any.
    pub fn add(&mut self, fp: Fingerprint, entry: TopKEntry) -> Option<(Fingerprint, TopKEntry)> {
        if let Some(slot) = self.slots.get_mut(&fp) {
            slot.entry = entry;
            let pos = slot.heap_pos;
            self.restore(pos);
            return None;
        }
        let evicted = if self.is_full() { self.pop() } else { None };
        let pos = self.heap.len();
        self.heap.push(fp);
        self.slots.insert(fp, Slot { entry, heap_pos: pos });
        self.sift_up(pos);
        evicted
    }

    /// Change the frequency of a held entry. Returns `false` if absent.
    pub fn update(&mut self, fp: &Fingerprint, frequency: u32) -> bool {
        let Some(slot) = self.slots.get_mut(fp) else {
            return false;
        };
        slot.entry.frequency = frequency;
        let pos = slot.heap_pos;
        self.restore(pos);
        true
    }

    /// Remove and return the minimum-frequency entry.
    pub fn pop(&mut self) -> Option<(Fingerprint, TopKEntry)> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(0, last);
        let fp = self.heap.pop()?;
        let slot = self.slots.remove(&fp)?;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some((fp, slot.entry))
    }

    /// Apply the admission rule for a chunk seen with `frequency`: refresh
    /// it if held, insert it if it qualifies. Returns whether it is held
    /// afterwards.
    pub fn admit(&mut self, fp: Fingerprint, address: StorageAddress, frequency: u32) -> bool {
        if !self.should_admit(frequency) {
            return false;
        }
        if !self.update(&fp, frequency) {
            self.add(fp, TopKEntry { address, frequency });
        }
        true
    }

    /// Entries in heap order (root first).
    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &TopKEntry)> {
        self.heap
            .iter()
            .filter_map(|fp| self.slots.get(fp).map(|slot| (fp, &slot.entry)))
    }

    // -----------------------------------------------------------------------
    // Heap maintenance
    // -----------------------------------------------------------------------

    fn key(&self, pos: usize) -> (u32, &Fingerprint) {
        let fp = &self.heap[pos];
        let frequency = self.slots.get(fp).map_or(0, |slot| slot.entry.frequency);
        (frequency, fp)
    }

    fn less(&self, a: usize, b: usize) -> bool {
        self.key(a).cmp(&self.key(b)) == Ordering::Less
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        for pos in [a, b] {
            let fp = self.heap[pos];
            if let Some(slot) = self.slots.get_mut(&fp) {
                slot.heap_pos = pos;
            }
        }
    }

    fn restore(&mut self, pos: usize) {
        let pos = self.sift_up(pos);
        self.sift_down(pos);
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.less(left, smallest) {
                smallest = left;
            }
            if right < len && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == pos {
                return;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.heap.len(), self.slots.len());
        assert!(self.heap.len() <= self.capacity);
        for (pos, fp) in self.heap.iter().enumerate() {
            assert_eq!(self.slots[fp].heap_pos, pos, "stale position for {fp}");
            if pos > 0 {
                assert!(!self.less(pos, (pos - 1) / 2), "heap order broken at {pos}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdup_types::ContainerId;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint([n; 32])
    }

    fn entry(offset: u32, frequency: u32) -> TopKEntry {
        TopKEntry {
            address: StorageAddress::whole(ContainerId([1; 16]), offset, 10),
            frequency,
        }
    }

    #[test]
    fn empty_index() {
        let index = TopKIndex::new(4);
        assert!(index.is_empty());
        assert_eq!(index.top_frequency(), 0);
        assert!(index.get(&fp(1)).is_none());
        assert!(index.should_admit(0));
    }

    #[test]
    fn top_frequency_is_zero_until_full() {
        let mut index = TopKIndex::new(3);
        index.add(fp(1), entry(0, 5));
        index.add(fp(2), entry(1, 7));
        assert_eq!(index.top_frequency(), 0);
        index.add(fp(3), entry(2, 6));
        assert_eq!(index.top_frequency(), 5);
        index.assert_consistent();
    }

    #[test]
    fn add_at_capacity_evicts_minimum() {
        let mut index = TopKIndex::new(3);
        index.add(fp(1), entry(0, 5));
        index.add(fp(2), entry(1, 2));
        index.add(fp(3), entry(2, 9));
        let evicted = index.add(fp(4), entry(3, 4)).unwrap();
        assert_eq!(evicted.0, fp(2));
        assert_eq!(index.len(), 3);
        for (_, remaining) in index.iter() {
            assert!(evicted.1.frequency <= remaining.frequency);
        }
        assert!(!index.contains(&fp(2)));
        index.assert_consistent();
    }

    #[test]
    fn update_reorders_heap() {
        let mut index = TopKIndex::new(3);
        index.add(fp(1), entry(0, 1));
        index.add(fp(2), entry(1, 2));
        index.add(fp(3), entry(2, 3));
        assert!(index.update(&fp(1), 10));
        assert_eq!(index.top_frequency(), 2);
        assert_eq!(index.pop().unwrap().0, fp(2));
        assert!(!index.update(&fp(9), 1));
        index.assert_consistent();
    }

    #[test]
    fn readding_existing_key_replaces_entry() {
        let mut index = TopKIndex::new(2);
        index.add(fp(1), entry(0, 1));
        index.add(fp(2), entry(1, 1));
        assert!(index.add(fp(1), entry(42, 3)).is_none());
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(&fp(1)).unwrap().offset, 42);
        index.assert_consistent();
    }

    #[test]
    fn ties_pop_in_fingerprint_order() {
        let mut index = TopKIndex::new(4);
        for n in [4, 2, 3, 1] {
            index.add(fp(n), entry(n as u32, 7));
        }
        let order: Vec<_> = std::iter::from_fn(|| index.pop().map(|(fp, _)| fp.0[0])).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn admission_rule_when_full() {
        let mut index = TopKIndex::new(2);
        assert!(index.admit(fp(1), entry(0, 0).address, 5));
        assert!(index.admit(fp(2), entry(1, 0).address, 8));
        assert_eq!(index.top_frequency(), 5);

        assert!(!index.admit(fp(3), entry(2, 0).address, 4));
        assert!(!index.contains(&fp(3)));

        assert!(index.admit(fp(4), entry(3, 0).address, 5));
        assert!(index.contains(&fp(4)));
        assert!(!index.contains(&fp(1)));
        assert_eq!(index.len(), 2);
        index.assert_consistent();
    }

    #[test]
    fn admit_refreshes_held_entry_without_moving_it() {
        let mut index = TopKIndex::new(2);
        let original = entry(7, 0).address;
        index.admit(fp(1), original, 1);
        index.admit(fp(1), entry(99, 0).address, 6);
        let held = index.entry(&fp(1)).unwrap();
        assert_eq!(held.frequency, 6);
        assert_eq!(held.address, original);
    }

    #[test]
    fn randomized_operations_keep_invariants() {
        let mut index = TopKIndex::new(16);
        let mut state = 0x1234_5678u32;
        for _ in 0..2000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let key = (state >> 16) as u8 % 40;
            let freq = (state >> 8) % 50;
            match state % 3 {
                0 => {
                    index.add(fp(key), entry(0, freq));
                }
                1 => {
                    index.update(&fp(key), freq);
                }
                _ => {
                    index.admit(fp(key), entry(0, 0).address, freq);
                }
            }
            index.assert_consistent();
        }
    }
}
