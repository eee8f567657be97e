use std::collections::HashMap;
use std::sync::Mutex;

use sealdup_types::{ContainerId, IndexToken, SF_NUM};

use super::{BoundaryCall, OfflineOutcome, UntrustedStore};
use crate::error::{Result, SealdupError};

/// In-memory untrusted store. Thread-safe via Mutex.
///
/// Besides serving the engine it records call counts and can be told to
/// fail a given call, which makes it the collaborator used throughout the
/// test suite.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    index: HashMap<IndexToken, Vec<u8>>,
    features: HashMap<IndexToken, IndexToken>,
    containers: HashMap<ContainerId, Vec<u8>>,
    recipes: Vec<Vec<u8>>,
    delta_links: Vec<(IndexToken, IndexToken)>,
    deferred: Vec<(IndexToken, IndexToken)>,
    calls: HashMap<BoundaryCall, usize>,
    fail_on: Option<BoundaryCall>,
}

impl MemoryState {
    fn enter(&mut self, call: BoundaryCall) -> Result<()> {
        *self.calls.entry(call).or_default() += 1;
        if self.fail_on == Some(call) {
            return Err(SealdupError::Boundary(format!("{call:?} failed (injected)")));
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `call` return an error.
    pub fn fail_on(&self, call: Option<BoundaryCall>) {
        self.state.lock().unwrap().fail_on = call;
    }

    pub fn call_count(&self, call: BoundaryCall) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&call)
            .copied()
            .unwrap_or(0)
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn container(&self, id: &ContainerId) -> Option<Vec<u8>> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub fn index_len(&self) -> usize {
        self.state.lock().unwrap().index.len()
    }

    pub fn index_value(&self, key: &IndexToken) -> Option<Vec<u8>> {
        self.state.lock().unwrap().index.get(key).cloned()
    }

    /// Sealed recipe batches in arrival order.
    pub fn recipes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().recipes.clone()
    }

    pub fn delta_links(&self) -> Vec<(IndexToken, IndexToken)> {
        self.state.lock().unwrap().delta_links.clone()
    }

    pub fn deferred_pairs(&self) -> Vec<(IndexToken, IndexToken)> {
        self.state.lock().unwrap().deferred.clone()
    }
}

impl UntrustedStore for MemoryStore {
    fn query_index(&self, tokens: &[IndexToken]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::QueryIndex)?;
        Ok(tokens.iter().map(|t| st.index.get(t).cloned()).collect())
    }

    fn query_base_candidates(
        &self,
        features: &[[IndexToken; SF_NUM]],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::QueryBaseCandidates)?;
        Ok(features
            .iter()
            .map(|sfs| {
                sfs.iter()
                    .filter_map(|sf| st.features.get(sf))
                    .find_map(|fp| st.index.get(fp).cloned())
            })
            .collect())
    }

    fn load_container(&self, id: &ContainerId) -> Result<Option<Vec<u8>>> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::LoadContainer)?;
        Ok(st.containers.get(id).cloned())
    }

    fn write_container(&self, id: &ContainerId, data: Vec<u8>) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::WriteContainer)?;
        st.containers.insert(*id, data);
        Ok(())
    }

    fn update_file_recipe(&self, sealed: Vec<u8>) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::UpdateFileRecipe)?;
        st.recipes.push(sealed);
        Ok(())
    }

    fn update_delta_index(&self, base: &IndexToken, new: &IndexToken) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::UpdateDeltaIndex)?;
        st.delta_links.push((*base, *new));
        Ok(())
    }

    fn local_insert(&self, pairs: &[(IndexToken, IndexToken)]) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::LocalInsert)?;
        st.deferred.extend_from_slice(pairs);
        Ok(())
    }

    fn update_index_store(&self, key: &IndexToken, value: Vec<u8>) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::UpdateIndexStore)?;
        st.index.insert(*key, value);
        Ok(())
    }

    fn update_index_sf(&self, feature: &IndexToken, fingerprint: &IndexToken) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::UpdateIndexSf)?;
        // First registrant stays the base for this feature.
        st.features.entry(*feature).or_insert(*fingerprint);
        Ok(())
    }

    fn run_offline(&self, update: bool) -> Result<OfflineOutcome> {
        let mut st = self.state.lock().unwrap();
        st.enter(BoundaryCall::RunOffline)?;
        let pairs = std::mem::take(&mut st.deferred);
        Ok(OfflineOutcome {
            pairs_processed: if update { pairs.len() } else { 0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(n: u8) -> IndexToken {
        IndexToken([n; 32])
    }

    #[test]
    fn index_roundtrip() {
        let store = MemoryStore::new();
        store.update_index_store(&token(1), b"value".to_vec()).unwrap();
        let out = store.query_index(&[token(1), token(2)]).unwrap();
        assert_eq!(out, vec![Some(b"value".to_vec()), None]);
        assert_eq!(store.call_count(BoundaryCall::QueryIndex), 1);
    }

    #[test]
    fn candidates_resolve_through_any_feature() {
        let store = MemoryStore::new();
        store.update_index_store(&token(1), b"base".to_vec()).unwrap();
        store.update_index_sf(&token(20), &token(1)).unwrap();
        let hit = [token(10), token(20), token(30)];
        let miss = [token(11), token(21), token(31)];
        let out = store.query_base_candidates(&[hit, miss]).unwrap();
        assert_eq!(out, vec![Some(b"base".to_vec()), None]);
    }

    #[test]
    fn first_feature_registrant_wins() {
        let store = MemoryStore::new();
        store.update_index_store(&token(1), b"first".to_vec()).unwrap();
        store.update_index_store(&token(2), b"second".to_vec()).unwrap();
        store.update_index_sf(&token(9), &token(1)).unwrap();
        store.update_index_sf(&token(9), &token(2)).unwrap();
        let out = store
            .query_base_candidates(&[[token(9), token(8), token(7)]])
            .unwrap();
        assert_eq!(out[0].as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn injected_failure() {
        let store = MemoryStore::new();
        store.fail_on(Some(BoundaryCall::LoadContainer));
        assert!(store.load_container(&ContainerId([0; 16])).is_err());
        store.fail_on(None);
        assert!(store.load_container(&ContainerId([0; 16])).unwrap().is_none());
        assert_eq!(store.call_count(BoundaryCall::LoadContainer), 2);
    }

    #[test]
    fn offline_consumes_deferred_pairs() {
        let store = MemoryStore::new();
        store.local_insert(&[(token(1), token(2)), (token(3), token(4))]).unwrap();
        assert_eq!(store.run_offline(true).unwrap().pairs_processed, 2);
        assert!(store.deferred_pairs().is_empty());
        store.local_insert(&[(token(1), token(2))]).unwrap();
        assert_eq!(store.run_offline(false).unwrap().pairs_processed, 0);
        assert!(store.deferred_pairs().is_empty());
    }
}
