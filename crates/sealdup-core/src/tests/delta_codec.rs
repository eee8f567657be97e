use proptest::prelude::*;

use crate::delta::{decode, encode, instructions, DeltaEncoder, Instruction};
use crate::testutil::{overlapping, random_chunk};

fn copied_bytes(delta: &[u8]) -> usize {
    instructions(delta)
        .map(|i| match i.unwrap() {
            Instruction::Copy { len, .. } => len as usize,
            Instruction::Insert(_) => 0,
        })
        .sum()
}

#[test]
fn identical_chunk_is_a_single_copy() {
    for len in [1, 16, 17, 4096] {
        let base = random_chunk(1, len);
        let delta = encode(&base, &base);
        assert!(delta.len() <= 8, "len {len}: {} byte delta", delta.len());
        assert_eq!(decode(&delta, &base).unwrap(), base);
    }
}

#[test]
fn empty_inputs() {
    let base = random_chunk(2, 512);
    assert!(encode(&[], &base).is_empty());
    let target = random_chunk(3, 512);
    let delta = encode(&target, &[]);
    assert_eq!(decode(&delta, &[]).unwrap(), target);
}

#[test]
fn disjoint_content_costs_little_over_the_target() {
    let base = random_chunk(4, 4096);
    let target = random_chunk(5, 4096);
    let delta = encode(&target, &base);
    assert!(delta.len() <= target.len() + 16);
    assert_eq!(decode(&delta, &base).unwrap(), target);
}

#[test]
fn shared_prefix_is_copied() {
    let base = random_chunk(6, 8192);
    let target = overlapping(&base, 60, 7);
    let delta = encode(&target, &base);
    assert!(delta.len() < target.len());
    assert!(copied_bytes(&delta) >= 8192 * 60 / 100);
    assert_eq!(decode(&delta, &base).unwrap(), target);
}

#[test]
fn insertion_keeps_both_sides() {
    let base = random_chunk(8, 8192);
    let mut target = base[..4000].to_vec();
    target.extend_from_slice(&random_chunk(9, 100));
    target.extend_from_slice(&base[4000..]);
    let delta = encode(&target, &base);
    assert!(delta.len() < 200, "{} byte delta", delta.len());
    assert_eq!(decode(&delta, &base).unwrap(), target);
}

#[test]
fn scattered_edits_stay_below_chunk_size() {
    let base = random_chunk(10, 8192);
    let mut target = base.clone();
    for at in [1000, 2500, 4000, 5500, 7000] {
        target[at] ^= 0x5A;
    }
    let delta = encode(&target, &base);
    assert!(delta.len() < target.len());
    assert_eq!(decode(&delta, &base).unwrap(), target);
}

#[test]
fn reused_encoder_matches_fresh_one() {
    let mut encoder = DeltaEncoder::new();
    for seed in 0..4u64 {
        let base = random_chunk(100 + seed, 6000);
        let target = overlapping(&base, 50, 200 + seed);
        assert_eq!(encoder.encode(&target, &base), encode(&target, &base));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_pairs_roundtrip(
        base in proptest::collection::vec(any::<u8>(), 0..3000),
        target in proptest::collection::vec(any::<u8>(), 0..3000),
    ) {
        let delta = encode(&target, &base);
        prop_assert_eq!(decode(&delta, &base).unwrap(), target);
    }

    #[test]
    fn spliced_pairs_roundtrip(
        seed in any::<u64>(),
        len in 64usize..6000,
        cut in 0usize..100,
        insert in proptest::collection::vec(any::<u8>(), 0..300),
    ) {
        let base = random_chunk(seed, len);
        let at = len * cut / 100;
        let mut target = base[..at].to_vec();
        target.extend_from_slice(&insert);
        target.extend_from_slice(&base[at..]);
        let delta = encode(&target, &base);
        prop_assert_eq!(decode(&delta, &base).unwrap(), target);
    }
}
