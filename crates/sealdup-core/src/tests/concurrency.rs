use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use sealdup_types::IndexRecord;

use crate::boundary::BoundaryCall;
use crate::config::IndexVariant;
use crate::engine::{ChunkBatch, ChunkRecord, Session};
use crate::testutil::{overlapping, random_chunk, test_config, PinnedBaseStore, TestEngine};

const THREADS: u64 = 4;
const ROUNDS: u64 = 3;

fn run_sessions(engine: &TestEngine<crate::boundary::MemoryStore>) -> Vec<(ChunkRecord, Vec<u8>)> {
    let shared: Vec<Vec<u8>> = (0..4).map(|i| random_chunk(100 + i, 2048)).collect();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let ctx = Arc::clone(&engine.ctx);
            let store = engine.store.clone();
            let shared = shared.clone();
            thread::spawn(move || {
                let mut session = Session::new(ctx, store);
                let mut out = Vec::new();
                for round in 0..ROUNDS {
                    let mut chunks = shared.clone();
                    chunks.push(random_chunk(1000 + t * 10 + round, 3000));
                    let batch =
                        ChunkBatch::from_chunks(chunks.clone(), &session.context().config().batch)
                            .unwrap();
                    let report = session.process_batch(&batch).unwrap();
                    out.extend(report.records.into_iter().zip(chunks));
                }
                session.process_tail_batch().unwrap();
                out
            })
        })
        .collect();
    handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect()
}

#[test]
fn parallel_sessions_share_one_engine() {
    let engine = TestEngine::new(test_config(IndexVariant::Frequency));
    let results = run_sessions(&engine);
    assert_eq!(results.len(), (THREADS * ROUNDS * 5) as usize);

    let stats = engine.ctx.stats();
    assert_eq!(stats.batches, THREADS * ROUNDS);
    assert_eq!(stats.logical_chunks, THREADS * ROUNDS * 5);
    assert_eq!(
        stats.unique_chunks + stats.delta_chunks + stats.duplicate_chunks(),
        stats.logical_chunks
    );
    // Each round's private chunk is new to everyone.
    assert!(stats.unique_chunks >= THREADS * ROUNDS);

    let reader = engine.reader();
    for (record, chunk) in &results {
        let entry = IndexRecord {
            fingerprint: record.fingerprint,
            address: record.address,
        };
        assert_eq!(&reader.read_chunk(&entry).unwrap(), chunk);
    }
}

#[test]
fn feature_pool_under_parallel_sessions() {
    let mut config = test_config(IndexVariant::Mega);
    config.features.threads = 3;
    let engine = TestEngine::new(config);
    let results = run_sessions(&engine);

    let reader = engine.reader();
    for (record, chunk) in &results {
        let entry = IndexRecord {
            fingerprint: record.fingerprint,
            address: record.address,
        };
        assert_eq!(&reader.read_chunk(&entry).unwrap(), chunk);
    }
    assert!(engine.ctx.top_k_len() <= 16);
}

#[test]
fn sessions_missing_on_one_container_load_it_once() {
    let base = random_chunk(500, 8192);
    let engine = TestEngine::with_store(test_config(IndexVariant::Mega), PinnedBaseStore::default());
    let mut writer = engine.session();
    writer.process_batch(&engine.batch(&[base.clone()])).unwrap();
    writer.process_tail_batch().unwrap();
    engine.store.pin(engine.token(&base));
    engine.store.slow_loads(Duration::from_millis(200));

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2u64)
        .map(|t| {
            let ctx = Arc::clone(&engine.ctx);
            let store = engine.store.clone();
            let barrier = Arc::clone(&barrier);
            let target = overlapping(&base, 70, 501 + t);
            thread::spawn(move || {
                let mut session = Session::new(ctx, store);
                let batch =
                    ChunkBatch::from_chunks(vec![target], &session.context().config().batch)
                        .unwrap();
                barrier.wait();
                session.process_batch(&batch).unwrap().stats
            })
        })
        .collect();
    let stats: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(engine.store.inner.call_count(BoundaryCall::LoadContainer), 1);
    assert_eq!(stats.iter().map(|s| s.container_loads).sum::<u64>(), 1);
    assert_eq!(stats.iter().map(|s| s.cache_hits).sum::<u64>(), 1);
    assert_eq!(stats.iter().map(|s| s.delta_chunks).sum::<u64>(), 2);
}
