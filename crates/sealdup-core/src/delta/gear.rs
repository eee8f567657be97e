//! Gear-hash content-defined sub-chunking used by the delta matcher.

pub(crate) const MIN_SUB_CHUNK: usize = 32;
pub(crate) const MAX_SUB_CHUNK: usize = 256;

/// Five high bits: a cut is expected about every 32 bytes past the minimum.
const CUT_MASK: u64 = 0xF800_0000_0000_0000;

const GEAR_SEED: u64 = 0x6765_6172_7461_626C;

static GEAR: [u64; 256] = build_gear_table();

const fn build_gear_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state = GEAR_SEED;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}

/// Length of the first sub-chunk of `buf`. Never zero for a non-empty
/// buffer and never longer than [`MAX_SUB_CHUNK`].
pub(crate) fn cut(buf: &[u8]) -> usize {
    if buf.len() <= MIN_SUB_CHUNK {
        return buf.len();
    }
    let limit = buf.len().min(MAX_SUB_CHUNK);
    let mut fp = 0u64;
    for (i, &b) in buf[..limit].iter().enumerate() {
        fp = (fp << 1).wrapping_add(GEAR[b as usize]);
        if i + 1 >= MIN_SUB_CHUNK && fp & CUT_MASK == 0 {
            return i + 1;
        }
    }
    limit
}

/// FNV-1a over a sub-chunk. Hits are always verified byte-for-byte, so a
/// weak hash is enough.
pub(crate) fn weak_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xCBF2_9CE4_8422_2325u64, |h, &b| {
        (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01B3)
    })
}
