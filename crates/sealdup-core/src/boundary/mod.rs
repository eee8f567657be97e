//! Request/response contract with the untrusted side.
//!
//! Nothing plaintext crosses this seam: fingerprints and super-features
//! travel as [`IndexToken`]s, everything else as sealed fixed-width records
//! or sealed containers. Calls are synchronous; an `Err` from any of them
//! is fatal to the batch that issued it.

pub mod memory;

use serde::{Deserialize, Serialize};

use sealdup_types::{ContainerId, IndexToken, SF_NUM};

use crate::error::{Result, SealdupError};

pub use memory::MemoryStore;

/// Names of the boundary calls, for logging and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryCall {
    QueryIndex,
    QueryBaseCandidates,
    LoadContainer,
    WriteContainer,
    UpdateFileRecipe,
    UpdateDeltaIndex,
    LocalInsert,
    UpdateIndexStore,
    UpdateIndexSf,
    RunOffline,
}

/// What the untrusted side did during an offline pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineOutcome {
    /// Deferred `(base, new)` pairs consumed by the pass.
    pub pairs_processed: usize,
}

pub trait UntrustedStore: Send + Sync {
    /// Resolve tokens missed by the in-boundary index. One slot per token;
    /// a hit carries a sealed index record.
    fn query_index(&self, tokens: &[IndexToken]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Find a stored chunk sharing at least one super-feature with each
    /// query. One slot per query; a hit carries the candidate's sealed index
    /// record.
    fn query_base_candidates(
        &self,
        features: &[[IndexToken; SF_NUM]],
    ) -> Result<Vec<Option<Vec<u8>>>>;

    /// Fetch a whole container. `None` if the store does not have it (yet).
    fn load_container(&self, id: &ContainerId) -> Result<Option<Vec<u8>>>;

    /// Persist a finished container.
    fn write_container(&self, id: &ContainerId, data: Vec<u8>) -> Result<()>;

    /// Append one sealed batch of file recipe entries.
    fn update_file_recipe(&self, sealed: Vec<u8>) -> Result<()>;

    /// Record that `new` was stored as a delta against `base`.
    fn update_delta_index(&self, base: &IndexToken, new: &IndexToken) -> Result<()>;

    /// Hand over `(base, new)` pairs whose delta was deferred to the offline
    /// pass.
    fn local_insert(&self, pairs: &[(IndexToken, IndexToken)]) -> Result<()>;

    /// Store the sealed index record for `key`.
    fn update_index_store(&self, key: &IndexToken, value: Vec<u8>) -> Result<()>;

    /// Register `fingerprint` under one of its super-feature tokens.
    fn update_index_sf(&self, feature: &IndexToken, fingerprint: &IndexToken) -> Result<()>;

    /// Run the offline pass over deferred pairs, or just discard them when
    /// `update` is false.
    fn run_offline(&self, update: bool) -> Result<OfflineOutcome>;
}

/// Reject a response whose slot count does not match the request.
pub(crate) fn check_response_len<T>(call: BoundaryCall, got: &[T], want: usize) -> Result<()> {
    if got.len() != want {
        return Err(SealdupError::Boundary(format!(
            "{call:?} returned {} results for {want} requests",
            got.len()
        )));
    }
    Ok(())
}
