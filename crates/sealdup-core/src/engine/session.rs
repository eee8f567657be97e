use std::sync::Arc;

use tracing::{debug, info, warn};

use sealdup_types::{
    ContainerId, DedupState, Fingerprint, IndexRecord, IndexToken, StorageAddress, SuperFeatures,
    SF_NUM,
};

use super::batch::{BatchPhase, BatchReport, ChunkBatch, ChunkRecord, OfflineReport, TailReport};
use super::context::EngineContext;
use super::records::{open_chunk, open_index_record, seal_index_record};
use crate::boundary::{check_response_len, BoundaryCall, UntrustedStore};
use crate::buffer::BufferPool;
use crate::compress::compress_if_smaller;
use crate::container::{read_record, ContainerKind, ContainerWriter};
use crate::delta::DeltaEncoder;
use crate::error::{Result, SealdupError};
use crate::format::{seal, ObjectType};
use crate::index::batch_local::BatchLocalIndex;
use crate::policy::{BatchSelector, Selection, SkipReason};
use crate::recipe::RecipeBuffer;
use crate::stats::EngineStats;

/// One client session. Drives each batch through the whole pipeline before
/// accepting the next one; sessions run concurrently over a shared
/// [`EngineContext`].
///
/// Any error is fatal: the session refuses further work afterwards.
pub struct Session {
    ctx: Arc<EngineContext>,
    store: Arc<dyn UntrustedStore>,
    local: BatchLocalIndex,
    pipeline: Pipeline,
    aborted: bool,
}

impl Session {
    pub fn new(ctx: Arc<EngineContext>, store: Arc<dyn UntrustedStore>) -> Self {
        let pipeline = Pipeline::new(&ctx);
        Self {
            ctx,
            store,
            local: BatchLocalIndex::new(),
            pipeline,
            aborted: false,
        }
    }

    /// Deduplicate and store one batch. The batch-local index is cleared on
    /// return whether the batch succeeded or not.
    pub fn process_batch(&mut self, batch: &ChunkBatch) -> Result<BatchReport> {
        self.ensure_live()?;
        let mut local = self.local.scope();
        let result = self
            .pipeline
            .run(&self.ctx, self.store.as_ref(), batch, &mut local);
        drop(local);
        self.settle(result)
    }

    /// Flush the partially filled recipe buffer and both open containers.
    pub fn process_tail_batch(&mut self) -> Result<TailReport> {
        self.ensure_live()?;
        let result = self.pipeline.flush_tail(&self.ctx, self.store.as_ref());
        self.settle(result)
    }

    /// Run the offline pass over deferred delta pairs. With `forward_only`
    /// the pairs are only discarded.
    pub fn process_offline(&mut self) -> Result<OfflineReport> {
        self.ensure_live()?;
        let update = !self.ctx.config().index.forward_only;
        let stats = {
            let mut shared = self.ctx.stats.lock().unwrap();
            shared.offline_passes += 1;
            shared.clone()
        };
        let result = self.store.run_offline(update).map(|outcome| {
            info!(update, pairs = outcome.pairs_processed, "offline pass finished");
            OfflineReport {
                updated: update,
                pairs_processed: outcome.pairs_processed,
                stats,
            }
        });
        self.settle(result)
    }

    pub fn phase(&self) -> BatchPhase {
        self.pipeline.phase
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    #[cfg(test)]
    pub(crate) fn batch_local_len(&self) -> usize {
        self.local.len()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.aborted {
            return Err(SealdupError::SessionAborted);
        }
        Ok(())
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        self.pipeline.phase = BatchPhase::Idle;
        if let Err(e) = &result {
            warn!(error = %e, "fatal error, aborting session");
            self.aborted = true;
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// How classification resolved a chunk.
#[derive(Debug, Clone, Copy)]
enum Resolution {
    /// Not known yet; asked the external index.
    Query,
    TopK(StorageAddress),
    External(StorageAddress),
    /// Repeat of the chunk at this batch position.
    Repeat(usize),
}

struct DeltaPlan {
    base: Fingerprint,
    stream: Vec<u8>,
}

struct Work<'b> {
    fingerprint: Fingerprint,
    data: &'b [u8],
    frequency: u32,
    resolution: Resolution,
    features: Option<SuperFeatures>,
    delta: Option<DeltaPlan>,
}

/// Session-owned pipeline state that outlives a batch.
struct Pipeline {
    phase: BatchPhase,
    recipe: RecipeBuffer,
    base: ContainerWriter,
    deltas: ContainerWriter,
    encoder: DeltaEncoder,
    scratch: Arc<BufferPool>,
}

impl Pipeline {
    fn new(ctx: &EngineContext) -> Self {
        let config = ctx.config();
        Self {
            phase: BatchPhase::Idle,
            recipe: RecipeBuffer::new(config.batch.recipe_flush_entries),
            base: ContainerWriter::new(ContainerKind::Base, config.container.capacity),
            deltas: ContainerWriter::new(ContainerKind::Delta, config.container.capacity),
            encoder: DeltaEncoder::new(),
            scratch: Arc::new(BufferPool::new(1, IndexRecord::SIZE)),
        }
    }

    fn enter(&mut self, phase: BatchPhase, chunks: usize) {
        debug!(phase = ?phase, from = ?self.phase, chunks, "batch phase");
        self.phase = phase;
    }

    fn run(
        &mut self,
        ctx: &EngineContext,
        store: &dyn UntrustedStore,
        batch: &ChunkBatch,
        local: &mut BatchLocalIndex,
    ) -> Result<BatchReport> {
        let n = batch.len();
        let mut stats = EngineStats {
            batches: 1,
            ..EngineStats::default()
        };

        self.enter(BatchPhase::Hashing, n);
        let mut work: Vec<Work<'_>> = batch
            .iter()
            .map(|data| Work {
                fingerprint: ctx.keys().fingerprint(data),
                data,
                frequency: 0,
                resolution: Resolution::Query,
                features: None,
                delta: None,
            })
            .collect();

        self.enter(BatchPhase::FrequencyUpdate, n);
        {
            let mut sketch = ctx.sketch.lock().unwrap();
            for w in &mut work {
                w.frequency = sketch.observe(&w.fingerprint);
            }
        }

        self.enter(BatchPhase::Classification, n);
        classify(ctx, &mut work, local);

        self.enter(BatchPhase::ExternalQuery, n);
        query_external(ctx, store, &mut work)?;
        let states = resolve_states(&work)?;

        self.enter(BatchPhase::SimilarityExtraction, n);
        let candidates: Vec<usize> = match ctx.policy() {
            Some(_) => (0..n)
                .filter(|&i| matches!(work[i].resolution, Resolution::Query))
                .collect(),
            None => Vec::new(),
        };
        let contents: Vec<&[u8]> = candidates.iter().map(|&i| work[i].data).collect();
        let features = ctx.features().extract_batch(&contents);
        for (&i, sf) in candidates.iter().zip(features) {
            work[i].features = Some(sf);
        }

        self.enter(BatchPhase::DeltaSelection, candidates.len());
        let deferred = self.select_deltas(ctx, store, &mut work, &candidates, &mut stats)?;

        self.enter(BatchPhase::Commit, n);
        let addresses = self.commit(ctx, store, &mut work, &mut stats)?;
        if !deferred.is_empty() {
            let pairs: Vec<(IndexToken, IndexToken)> = deferred
                .iter()
                .map(|(base, new)| (ctx.keys().token(base), ctx.keys().token(new)))
                .collect();
            store.local_insert(&pairs)?;
            stats.deferred_pairs += pairs.len() as u64;
        }
        ctx.stats.lock().unwrap().merge(&stats);

        self.enter(BatchPhase::TopKRefresh, n);
        {
            let mut top_k = ctx.top_k.lock().unwrap();
            for ((w, state), address) in work.iter().zip(&states).zip(&addresses) {
                if !state.is_batch_local() {
                    top_k.admit(w.fingerprint, *address, w.frequency);
                }
            }
        }

        self.enter(BatchPhase::Idle, n);
        let records = work
            .iter()
            .zip(states)
            .zip(addresses)
            .map(|((w, state), address)| ChunkRecord {
                fingerprint: w.fingerprint,
                size: w.data.len() as u32,
                frequency: w.frequency,
                state,
                address,
            })
            .collect();
        Ok(BatchReport { records, stats })
    }

    // -----------------------------------------------------------------------
    // Delta selection
    // -----------------------------------------------------------------------

    /// Look up base candidates for the unresolved chunks and encode the
    /// accepted ones. Returns the `(base, new)` pairs deferred to the
    /// offline pass.
    fn select_deltas(
        &mut self,
        ctx: &EngineContext,
        store: &dyn UntrustedStore,
        work: &mut [Work<'_>],
        candidates: &[usize],
        stats: &mut EngineStats,
    ) -> Result<Vec<(Fingerprint, Fingerprint)>> {
        let Some(policy) = ctx.policy() else {
            return Ok(Vec::new());
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let queries: Vec<[IndexToken; SF_NUM]> = candidates
            .iter()
            .filter_map(|&i| work[i].features.as_ref())
            .map(|sf| ctx.keys().feature_tokens(sf))
            .collect();
        let replies = store.query_base_candidates(&queries)?;
        check_response_len(BoundaryCall::QueryBaseCandidates, &replies, candidates.len())?;

        let mut selector = policy.begin_batch(work.len());
        for (&i, reply) in candidates.iter().zip(replies) {
            let Some(sealed) = reply else {
                continue;
            };
            let base = open_index_record(ctx, &sealed)?;
            if base.fingerprint == work[i].fingerprint {
                continue;
            }
            let Some(base_content) =
                self.fetch_base(ctx, store, &mut selector, &work[i].fingerprint, &base, stats)?
            else {
                continue;
            };
            let stream = self.encoder.encode(work[i].data, &base_content);
            if stream.len() < work[i].data.len() {
                work[i].delta = Some(DeltaPlan {
                    base: base.fingerprint,
                    stream,
                });
            } else {
                stats.skipped.record(SkipReason::NoGain);
            }
        }
        debug!(
            loads = selector.loads(),
            saturated = selector.is_saturated(),
            "delta selection done"
        );
        Ok(selector.take_deferred())
    }

    /// Content of the base chunk if the policy accepts it, loading its
    /// container when needed.
    fn fetch_base(
        &self,
        ctx: &EngineContext,
        store: &dyn UntrustedStore,
        selector: &mut BatchSelector,
        chunk: &Fingerprint,
        base: &IndexRecord,
        stats: &mut EngineStats,
    ) -> Result<Option<Vec<u8>>> {
        let addr = &base.address;
        if let Some(record) = self.base.read(&addr.container, addr.offset, addr.length) {
            return match selector.decide_resident(chunk, &base.fingerprint, addr) {
                Selection::Skip(reason) => {
                    stats.skipped.record(reason);
                    Ok(None)
                }
                _ => {
                    stats.resident_hits += 1;
                    open_chunk(ctx, record, &base.fingerprint).map(Some)
                }
            };
        }

        // Lookup, load and insert happen under one cache lock, so sessions
        // missing on the same container issue a single load.
        let container = {
            let mut cache = ctx.cache.lock().unwrap();
            match selector.decide(chunk, &base.fingerprint, addr, &cache) {
                Selection::Skip(reason) => {
                    stats.skipped.record(reason);
                    return Ok(None);
                }
                Selection::Resident => {
                    return Err(SealdupError::Other(
                        "resident selection for a closed container".into(),
                    ))
                }
                Selection::Cached(bytes) => {
                    stats.cache_hits += 1;
                    bytes
                }
                Selection::Load => {
                    stats.container_loads += 1;
                    let Some(raw) = store.load_container(&addr.container)? else {
                        warn!(container = %addr.container, "base container not available");
                        stats.skipped.record(SkipReason::Unavailable);
                        return Ok(None);
                    };
                    let bytes = bytes::Bytes::from(raw);
                    cache.insert(addr.container, bytes.clone());
                    bytes
                }
            }
        };
        let record = read_record(&container, addr.offset, addr.length)?;
        open_chunk(ctx, record, &base.fingerprint).map(Some)
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Store or reference every chunk in arrival order and append it to the
    /// recipe. Returns the address of each chunk.
    fn commit(
        &mut self,
        ctx: &EngineContext,
        store: &dyn UntrustedStore,
        work: &mut [Work<'_>],
        stats: &mut EngineStats,
    ) -> Result<Vec<StorageAddress>> {
        let mut addresses: Vec<StorageAddress> = Vec::with_capacity(work.len());
        for w in work.iter_mut() {
            stats.logical_chunks += 1;
            stats.logical_bytes += w.data.len() as u64;
            let address = match w.resolution {
                Resolution::Repeat(first) => {
                    stats.duplicate_batch_local += 1;
                    addresses[first]
                }
                Resolution::TopK(address) => {
                    stats.duplicate_top_k += 1;
                    address
                }
                Resolution::External(address) => {
                    stats.duplicate_external += 1;
                    address
                }
                Resolution::Query => match w.delta.take() {
                    Some(plan) => self.store_delta(ctx, store, w, plan, stats)?,
                    None => self.store_whole(ctx, store, w, stats)?,
                },
            };
            addresses.push(address);
            let entry = IndexRecord {
                fingerprint: w.fingerprint,
                address,
            };
            if self.recipe.push(entry) {
                self.flush_recipe(ctx, store)?;
            }
        }
        Ok(addresses)
    }

    fn store_whole(
        &mut self,
        ctx: &EngineContext,
        store: &dyn UntrustedStore,
        w: &Work<'_>,
        stats: &mut EngineStats,
    ) -> Result<StorageAddress> {
        let payload = compress_if_smaller(ctx.compression(), w.data)?;
        let sealed = seal(
            ObjectType::ChunkData,
            w.fingerprint.as_bytes(),
            &payload,
            ctx.crypto(),
        )?;
        let (container, offset) = self.append(store, ContainerKind::Base, &sealed)?;
        let address = StorageAddress::whole(container, offset, sealed.len() as u32);
        stats.unique_chunks += 1;
        stats.unique_bytes += w.data.len() as u64;
        stats.stored_bytes += sealed.len() as u64;

        let token = self.register(ctx, store, &w.fingerprint, address)?;
        if let Some(features) = &w.features {
            for feature in ctx.keys().feature_tokens(features) {
                store.update_index_sf(&feature, &token)?;
            }
        }
        Ok(address)
    }

    fn store_delta(
        &mut self,
        ctx: &EngineContext,
        store: &dyn UntrustedStore,
        w: &Work<'_>,
        plan: DeltaPlan,
        stats: &mut EngineStats,
    ) -> Result<StorageAddress> {
        let sealed = seal(
            ObjectType::DeltaData,
            w.fingerprint.as_bytes(),
            &plan.stream,
            ctx.crypto(),
        )?;
        let (container, offset) = self.append(store, ContainerKind::Delta, &sealed)?;
        let address = StorageAddress::delta(container, offset, sealed.len() as u32, plan.base);
        stats.delta_chunks += 1;
        stats.delta_source_bytes += w.data.len() as u64;
        stats.delta_bytes += plan.stream.len() as u64;
        stats.stored_bytes += sealed.len() as u64;

        let token = self.register(ctx, store, &w.fingerprint, address)?;
        store.update_delta_index(&ctx.keys().token(&plan.base), &token)?;
        Ok(address)
    }

    /// Publish the index value for a newly stored chunk.
    fn register(
        &self,
        ctx: &EngineContext,
        store: &dyn UntrustedStore,
        fingerprint: &Fingerprint,
        address: StorageAddress,
    ) -> Result<IndexToken> {
        let token = ctx.keys().token(fingerprint);
        let record = IndexRecord {
            fingerprint: *fingerprint,
            address,
        };
        store.update_index_store(&token, seal_index_record(ctx, &self.scratch, &record)?)?;
        Ok(token)
    }

    fn append(
        &mut self,
        store: &dyn UntrustedStore,
        kind: ContainerKind,
        record: &[u8],
    ) -> Result<(ContainerId, u32)> {
        let writer = match kind {
            ContainerKind::Base => &mut self.base,
            ContainerKind::Delta => &mut self.deltas,
        };
        if !writer.fits(record.len()) {
            flush_container(writer, store)?;
        }
        writer.append(record)
    }

    fn flush_recipe(&mut self, ctx: &EngineContext, store: &dyn UntrustedStore) -> Result<usize> {
        let Some(batch) = self.recipe.take_batch() else {
            return Ok(0);
        };
        let sealed = seal(ObjectType::Recipe, &batch.context(), &batch.bytes, ctx.crypto())?;
        store.update_file_recipe(sealed)?;
        debug!(
            sequence = batch.sequence,
            entries = batch.entries,
            "flushed file recipe"
        );
        Ok(batch.entries)
    }

    fn flush_tail(&mut self, ctx: &EngineContext, store: &dyn UntrustedStore) -> Result<TailReport> {
        let recipe_entries = self.flush_recipe(ctx, store)?;
        let mut containers_written = 0;
        if flush_container(&mut self.base, store)? {
            containers_written += 1;
        }
        if flush_container(&mut self.deltas, store)? {
            containers_written += 1;
        }
        info!(recipe_entries, containers_written, "tail batch flushed");
        Ok(TailReport {
            recipe_entries,
            containers_written,
        })
    }
}

// ---------------------------------------------------------------------------
// Classification helpers
// ---------------------------------------------------------------------------

/// Batch-local index first, then the Top-K index for chunks at or above
/// its admission frequency. Everything else goes to the external index.
fn classify(ctx: &EngineContext, work: &mut [Work<'_>], local: &mut BatchLocalIndex) {
    let top_k = ctx.top_k.lock().unwrap();
    let threshold = top_k.top_frequency();
    for i in 0..work.len() {
        let fp = work[i].fingerprint;
        if let Some(first) = local.get(&fp) {
            let frequency = work[i].frequency;
            work[first].frequency = work[first].frequency.max(frequency);
            work[i].resolution = Resolution::Repeat(first);
        } else if work[i].frequency >= threshold {
            if let Some(address) = top_k.get(&fp) {
                work[i].resolution = Resolution::TopK(*address);
            }
        }
        local.record(fp, i);
    }
}

fn query_external(
    ctx: &EngineContext,
    store: &dyn UntrustedStore,
    work: &mut [Work<'_>],
) -> Result<()> {
    let pending: Vec<usize> = (0..work.len())
        .filter(|&i| matches!(work[i].resolution, Resolution::Query))
        .collect();
    if pending.is_empty() {
        return Ok(());
    }
    let tokens: Vec<IndexToken> = pending
        .iter()
        .map(|&i| ctx.keys().token(&work[i].fingerprint))
        .collect();
    let replies = store.query_index(&tokens)?;
    check_response_len(BoundaryCall::QueryIndex, &replies, tokens.len())?;
    for (&i, reply) in pending.iter().zip(replies) {
        let Some(sealed) = reply else {
            continue;
        };
        let record = open_index_record(ctx, &sealed)?;
        if record.fingerprint != work[i].fingerprint {
            return Err(SealdupError::InvalidFormat(format!(
                "index answered {} for {}",
                record.fingerprint, work[i].fingerprint
            )));
        }
        work[i].resolution = Resolution::External(record.address);
    }
    Ok(())
}

/// Final dedup state per chunk. Repeats inherit from their first
/// occurrence, which always precedes them.
fn resolve_states(work: &[Work<'_>]) -> Result<Vec<DedupState>> {
    let mut states: Vec<DedupState> = Vec::with_capacity(work.len());
    for w in work {
        let state = match w.resolution {
            Resolution::Query => DedupState::Unique,
            Resolution::TopK(_) | Resolution::External(_) => DedupState::Duplicate,
            Resolution::Repeat(first) => {
                let Some(earlier) = states.get(first) else {
                    return Err(SealdupError::Other(format!(
                        "repeat points at later position {first}"
                    )));
                };
                earlier.repeated()?
            }
        };
        states.push(state);
    }
    Ok(states)
}

/// Write out the open container, if it holds anything.
fn flush_container(writer: &mut ContainerWriter, store: &dyn UntrustedStore) -> Result<bool> {
    let kind = writer.kind();
    let Some((id, bytes)) = writer.take() else {
        return Ok(false);
    };
    debug!(container = %id, kind = ?kind, bytes = bytes.len(), "writing container");
    store.write_container(&id, bytes)?;
    Ok(true)
}
