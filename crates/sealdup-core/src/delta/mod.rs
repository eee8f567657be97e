//! Copy/insert delta codec.
//!
//! A delta stream is a sequence of instructions, each starting with a
//! little-endian `u32` header: the top bit selects the shape, the low 31
//! bits carry a length.
//!
//! ```text
//! copy:   [header flag=0 | len][u32 base offset]
//! insert: [header flag=1 | len][len literal bytes]
//! ```

mod arena;
mod encoder;
mod gear;

pub use encoder::DeltaEncoder;

use crate::error::{Result, SealdupError};

const FLAG_INSERT: u32 = 1 << 31;
const LEN_MASK: u32 = FLAG_INSERT - 1;

/// Longest run a single instruction can describe.
pub const MAX_INSTRUCTION_LEN: usize = LEN_MASK as usize;

/// Upper bound on decoded output; a corrupt stream cannot allocate past it.
const MAX_DECODED_SIZE: usize = 16 * 1024 * 1024;

/// Encode `target` against `base` with a throwaway encoder.
pub fn encode(target: &[u8], base: &[u8]) -> Vec<u8> {
    DeltaEncoder::new().encode(target, base)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Copy { offset: u32, len: u32 },
    Insert(&'a [u8]),
}

/// Parse a delta stream into instructions without applying them.
pub fn instructions(delta: &[u8]) -> Instructions<'_> {
    Instructions { delta, pos: 0 }
}

pub struct Instructions<'a> {
    delta: &'a [u8],
    pos: usize,
}

impl<'a> Instructions<'a> {
    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let Some(raw) = self.delta.get(self.pos..self.pos + 4) else {
            return Err(SealdupError::DeltaCorrupt(format!(
                "truncated {what} at byte {}",
                self.pos
            )));
        };
        let mut word = [0u8; 4];
        word.copy_from_slice(raw);
        self.pos += 4;
        Ok(u32::from_le_bytes(word))
    }

    fn parse(&mut self) -> Result<Instruction<'a>> {
        let header = self.read_u32("header")?;
        let len = header & LEN_MASK;
        if header & FLAG_INSERT != 0 {
            let start = self.pos;
            let Some(bytes) = self.delta.get(start..start + len as usize) else {
                return Err(SealdupError::DeltaCorrupt(format!(
                    "insert of {len} bytes at byte {start} runs past end of stream"
                )));
            };
            self.pos += len as usize;
            Ok(Instruction::Insert(bytes))
        } else {
            let offset = self.read_u32("copy offset")?;
            Ok(Instruction::Copy { offset, len })
        }
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.delta.len() {
            return None;
        }
        let parsed = self.parse();
        if parsed.is_err() {
            // Stop after the first error.
            self.pos = self.delta.len();
        }
        Some(parsed)
    }
}

/// Rebuild the target by replaying `delta` against `base`.
pub fn decode(delta: &[u8], base: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decode_into(delta, base, &mut out)?;
    Ok(out)
}

/// Like [`decode`], writing into a caller-provided buffer (cleared first).
pub fn decode_into(delta: &[u8], base: &[u8], out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    for instruction in instructions(delta) {
        match instruction? {
            Instruction::Copy { offset, len } => {
                let start = offset as usize;
                let Some(src) = start
                    .checked_add(len as usize)
                    .and_then(|end| base.get(start..end))
                else {
                    return Err(SealdupError::DeltaCorrupt(format!(
                        "copy {start}+{len} exceeds base of {} bytes",
                        base.len()
                    )));
                };
                check_output(out.len(), src.len())?;
                out.extend_from_slice(src);
            }
            Instruction::Insert(bytes) => {
                check_output(out.len(), bytes.len())?;
                out.extend_from_slice(bytes);
            }
        }
    }
    Ok(())
}

fn check_output(current: usize, add: usize) -> Result<()> {
    if current + add > MAX_DECODED_SIZE {
        return Err(SealdupError::DeltaCorrupt(format!(
            "decoded size exceeds limit of {MAX_DECODED_SIZE} bytes"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Instruction writer
// ---------------------------------------------------------------------------

/// Appends instructions, merging consecutive literals into one insert.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
    out: Vec<u8>,
    /// Header position of the open insert instruction, if the last
    /// instruction written was an insert.
    open_insert: Option<usize>,
}

impl Emitter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            open_insert: None,
        }
    }

    pub fn copy(&mut self, mut offset: usize, mut len: usize) {
        while len > 0 {
            let step = len.min(MAX_INSTRUCTION_LEN);
            self.out.extend_from_slice(&(step as u32).to_le_bytes());
            self.out.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += step;
            len -= step;
        }
        self.open_insert = None;
    }

    pub fn literal(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let header = match self.open_insert {
                Some(h) if self.open_len() < MAX_INSTRUCTION_LEN => h,
                _ => {
                    let h = self.out.len();
                    self.out.extend_from_slice(&FLAG_INSERT.to_le_bytes());
                    self.open_insert = Some(h);
                    h
                }
            };
            let room = MAX_INSTRUCTION_LEN - self.open_len();
            let (now, rest) = bytes.split_at(bytes.len().min(room));
            self.out.extend_from_slice(now);
            let len = self.open_len() + now.len();
            self.set_len(header, len);
            bytes = rest;
        }
    }

    /// Bytes in the open insert instruction (0 if none).
    pub fn pending_literal(&self) -> usize {
        self.open_insert.map_or(0, |_| self.open_len())
    }

    /// Take back the last `n` literal bytes so a copy can absorb them.
    pub fn retract_literal(&mut self, n: usize) {
        let Some(header) = self.open_insert else {
            return;
        };
        let remaining = self.open_len().saturating_sub(n);
        if remaining == 0 {
            self.out.truncate(header);
            self.open_insert = None;
        } else {
            self.out.truncate(header + 4 + remaining);
            self.set_len(header, remaining);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    fn open_len(&self) -> usize {
        match self.open_insert {
            Some(h) => {
                let mut word = [0u8; 4];
                word.copy_from_slice(&self.out[h..h + 4]);
                (u32::from_le_bytes(word) & LEN_MASK) as usize
            }
            None => 0,
        }
    }

    fn set_len(&mut self, header: usize, len: usize) {
        let word = FLAG_INSERT | len as u32;
        self.out[header..header + 4].copy_from_slice(&word.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitter_coalesces_literals() {
        let mut em = Emitter::default();
        em.literal(b"abc");
        em.literal(b"def");
        em.copy(10, 4);
        em.literal(b"g");
        let stream = em.finish();
        let parsed: Vec<_> = instructions(&stream).collect::<Result<_>>().unwrap();
        assert_eq!(
            parsed,
            vec![
                Instruction::Insert(b"abcdef"),
                Instruction::Copy { offset: 10, len: 4 },
                Instruction::Insert(b"g"),
            ]
        );
    }

    #[test]
    fn retract_shrinks_or_removes_literal() {
        let mut em = Emitter::default();
        em.literal(b"hello");
        em.retract_literal(2);
        assert_eq!(em.pending_literal(), 3);
        em.retract_literal(3);
        assert_eq!(em.pending_literal(), 0);
        em.copy(0, 5);
        let stream = em.finish();
        assert_eq!(stream.len(), 8);
        assert_eq!(
            instructions(&stream).next().unwrap().unwrap(),
            Instruction::Copy { offset: 0, len: 5 }
        );
    }

    #[test]
    fn empty_runs_emit_nothing() {
        let mut em = Emitter::default();
        em.copy(3, 0);
        em.literal(b"");
        assert!(em.finish().is_empty());
    }

    #[test]
    fn decode_replays_instructions() {
        let mut em = Emitter::default();
        em.copy(2, 3);
        em.literal(b"XY");
        em.copy(0, 2);
        let stream = em.finish();
        assert_eq!(decode(&stream, b"abcdef").unwrap(), b"cdeXYab");
    }

    #[test]
    fn decode_rejects_copy_past_base() {
        let mut em = Emitter::default();
        em.copy(4, 10);
        let err = decode(&em.finish(), b"short").unwrap_err();
        assert!(matches!(err, SealdupError::DeltaCorrupt(_)));
    }

    #[test]
    fn decode_rejects_truncated_stream() {
        let mut em = Emitter::default();
        em.literal(b"abcdef");
        let stream = em.finish();
        assert!(decode(&stream[..7], b"").is_err());
        assert!(decode(&stream[..3], b"").is_err());

        let mut em = Emitter::default();
        em.copy(0, 1);
        let stream = em.finish();
        assert!(decode(&stream[..6], b"a").is_err());
    }

    #[test]
    fn empty_stream_decodes_to_empty() {
        assert!(decode(&[], b"base").unwrap().is_empty());
    }
}
