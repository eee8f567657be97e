use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tracing::debug;

use sealdup_types::ContainerId;

/// Bounded cache of loaded base containers, evicted oldest-insert first.
///
/// Contents are handed out as [`Bytes`], so a batch that already holds a
/// container keeps its view alive even if the cache evicts it meanwhile.
#[derive(Debug)]
pub struct ContainerCache {
    capacity: usize,
    entries: HashMap<ContainerId, Bytes>,
    order: VecDeque<ContainerId>,
}

impl ContainerCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn exists(&self, id: &ContainerId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn read(&self, id: &ContainerId) -> Option<Bytes> {
        self.entries.get(id).cloned()
    }

    /// Insert a container. A second insert for the same id is a no-op.
    /// Returns whether the container was newly inserted.
    pub fn insert(&mut self, id: ContainerId, data: Bytes) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!(container = %oldest, "evicted container from cache");
        }
        self.entries.insert(id, data);
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
