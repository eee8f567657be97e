use super::arena::{SubChunk, SubChunkArena};
use super::gear::{cut, weak_hash};
use super::Emitter;

/// Shared prefix or suffix shorter than this is matched normally instead
/// of being stripped up front.
const AFFIX_MIN: usize = 16;
/// Base sub-chunks indexed in the first round of an expansion.
const BASE_BEGIN: usize = 5;
/// Growth factor of the per-round base sub-chunk count.
const BASE_EXPAND: usize = 3;
/// Rounds per expansion.
const BASE_STEP: usize = 3;
/// Target sub-chunks probed per expansion.
const INPUT_TRY: usize = 5;

#[derive(Debug, Clone, Copy)]
struct Probe {
    offset: usize,
    len: usize,
    hash: u64,
}

/// Reusable delta encoder. Holds the sub-chunk arena between calls so
/// repeated encodes do not reallocate it.
#[derive(Debug, Default)]
pub struct DeltaEncoder {
    arena: SubChunkArena,
    probes: Vec<Probe>,
}

impl DeltaEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `target` as copy/insert instructions against `base`.
    pub fn encode(&mut self, target: &[u8], base: &[u8]) -> Vec<u8> {
        self.arena.reset();
        self.probes.clear();
        let mut em = Emitter::with_capacity(target.len() / 4 + 16);

        let (beg, end) = common_affixes(target, base);
        if beg + end >= base.len() {
            em.copy(0, beg);
            em.literal(&target[beg..target.len() - end]);
            em.copy(base.len() - end, end);
            return em.finish();
        }

        em.copy(0, beg);
        let base_end = base.len() - end;
        let target_end = target.len() - end;
        let mut base_cursor = beg;
        let mut pos = beg;

        while pos < target_end {
            if base_cursor < base_end && lags_behind(pos, target.len(), base_cursor, base.len()) {
                pos = self.expand(&mut em, target, base, pos, target_end, base_end, &mut base_cursor);
                continue;
            }

            let len = cut(&target[pos..target_end]);
            let probe = Probe {
                offset: pos,
                len,
                hash: weak_hash(&target[pos..pos + len]),
            };
            match find_match(&self.arena, target, base, &probe) {
                Some(record) => {
                    pos = extend_and_copy(
                        &mut em, target, base, &probe, &record, target_end, base_end,
                        &mut base_cursor,
                    );
                }
                None => {
                    em.literal(&target[pos..pos + len]);
                    pos += len;
                }
            }
        }

        em.copy(base.len() - end, end);
        em.finish()
    }

    /// Index more of the base in growing rounds while probing the next few
    /// target sub-chunks. Probes before the first hit are emitted as
    /// literals. Returns the new target position.
    #[allow(clippy::too_many_arguments)]
    fn expand(
        &mut self,
        em: &mut Emitter,
        target: &[u8],
        base: &[u8],
        pos: usize,
        target_end: usize,
        base_end: usize,
        base_cursor: &mut usize,
    ) -> usize {
        self.probes.clear();
        let mut p = pos;
        while self.probes.len() < INPUT_TRY && p < target_end {
            let len = cut(&target[p..target_end]);
            self.probes.push(Probe {
                offset: p,
                len,
                hash: weak_hash(&target[p..p + len]),
            });
            p += len;
        }

        let mut count = BASE_BEGIN;
        let mut hit = None;
        for _ in 0..BASE_STEP {
            *base_cursor = self.index_base(base, *base_cursor, base_end, count);
            count *= BASE_EXPAND;
            hit = self
                .probes
                .iter()
                .enumerate()
                .find_map(|(i, probe)| find_match(&self.arena, target, base, probe).map(|r| (i, r)));
            if hit.is_some() || *base_cursor >= base_end {
                break;
            }
        }

        let literal_upto = hit.map_or(self.probes.len(), |(i, _)| i);
        let mut next = pos;
        for probe in &self.probes[..literal_upto] {
            em.literal(&target[probe.offset..probe.offset + probe.len]);
            next = probe.offset + probe.len;
        }
        match hit {
            Some((i, record)) => {
                let probe = self.probes[i];
                extend_and_copy(em, target, base, &probe, &record, target_end, base_end, base_cursor)
            }
            None => next,
        }
    }

    /// Sub-chunk up to `count` more pieces of `base[cursor..base_end]` into
    /// the arena. Returns the new cursor.
    fn index_base(&mut self, base: &[u8], mut cursor: usize, base_end: usize, count: usize) -> usize {
        for _ in 0..count {
            if cursor >= base_end {
                break;
            }
            let len = cut(&base[cursor..base_end]);
            self.arena
                .insert(cursor, len, weak_hash(&base[cursor..cursor + len]));
            cursor += len;
        }
        cursor
    }
}

/// True while the base cursor trails the target position by less than half
/// a buffer, proportionally; then more of the base is worth indexing.
fn lags_behind(pos: usize, target_len: usize, base_cursor: usize, base_len: usize) -> bool {
    pos as f64 / target_len as f64 + 0.5 >= base_cursor as f64 / base_len as f64
}

fn find_match(arena: &SubChunkArena, target: &[u8], base: &[u8], probe: &Probe) -> Option<SubChunk> {
    let wanted = &target[probe.offset..probe.offset + probe.len];
    arena
        .bucket(probe.hash)
        .find(|r| r.len == probe.len && &base[r.offset..r.offset + r.len] == wanted)
        .copied()
}

/// Grow a verified sub-chunk match in both directions and emit it as one
/// copy. Backward growth only reclaims bytes still sitting in the open
/// literal run. Returns the target position after the copy.
#[allow(clippy::too_many_arguments)]
fn extend_and_copy(
    em: &mut Emitter,
    target: &[u8],
    base: &[u8],
    probe: &Probe,
    record: &SubChunk,
    target_end: usize,
    base_end: usize,
    base_cursor: &mut usize,
) -> usize {
    let t_after = probe.offset + probe.len;
    let b_after = record.offset + record.len;
    let forward = if b_after < base_end && t_after < target_end {
        common_prefix_len(&base[b_after..base_end], &target[t_after..target_end])
    } else {
        0
    };

    let max_back = em.pending_literal().min(record.offset);
    let backward = common_suffix_len(
        &base[record.offset - max_back..record.offset],
        &target[probe.offset - max_back..probe.offset],
    );
    em.retract_literal(backward);
    em.copy(record.offset - backward, backward + probe.len + forward);

    *base_cursor = (*base_cursor).max(b_after + forward);
    t_after + forward
}

/// Lengths of the shared prefix and suffix worth stripping. The two never
/// overlap in `target`.
fn common_affixes(target: &[u8], base: &[u8]) -> (usize, usize) {
    let mut beg = common_prefix_len(target, base);
    if beg <= AFFIX_MIN {
        beg = 0;
    }
    let mut end = common_suffix_len(&target[beg..], &base[beg.min(base.len())..]);
    if end <= AFFIX_MIN {
        end = 0;
    }
    (beg, end)
}

#[inline]
fn word(s: &[u8], at: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&s[at..at + 8]);
    u64::from_le_bytes(w)
}

/// Number of equal leading bytes, compared a word at a time.
pub(crate) fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let mut i = 0;
    while i + 8 <= n {
        let diff = word(a, i) ^ word(b, i);
        if diff != 0 {
            return i + (diff.trailing_zeros() / 8) as usize;
        }
        i += 8;
    }
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

/// Number of equal trailing bytes, compared a word at a time.
pub(crate) fn common_suffix_len(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let mut matched = 0;
    while matched + 8 <= n {
        let at = n - matched - 8;
        let diff = word(a, at) ^ word(b, at);
        if diff != 0 {
            return matched + (diff.leading_zeros() / 8) as usize;
        }
        matched += 8;
    }
    while matched < n && a[n - matched - 1] == b[n - matched - 1] {
        matched += 1;
    }
    matched
}
