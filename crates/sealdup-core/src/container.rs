use sealdup_types::ContainerId;

use crate::error::{Result, SealdupError};

/// Magic bytes at the start of every container.
pub const CONTAINER_MAGIC: &[u8; 8] = b"SDCONTNR";
/// Container format version.
pub const CONTAINER_VERSION: u8 = 1;
/// Size of the container header (magic + version byte).
pub const CONTAINER_HEADER_SIZE: usize = 9;

/// Base containers hold whole chunks; delta containers hold delta streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Base,
    Delta,
}

/// Accumulates sealed records into one container at a time.
///
/// Layout: `[magic 8][version 1]` then `[u32 len LE][record]` repeated.
/// Offsets handed out point at the record bytes, after the length prefix.
pub struct ContainerWriter {
    kind: ContainerKind,
    capacity: usize,
    id: ContainerId,
    bytes: Vec<u8>,
    records: usize,
}

impl ContainerWriter {
    pub fn new(kind: ContainerKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            id: ContainerId::generate(),
            bytes: Vec::new(),
            records: 0,
        }
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Id of the container currently being filled.
    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn has_pending(&self) -> bool {
        self.records > 0
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Whether a record of `len` bytes still fits. An empty container
    /// accepts any record.
    pub fn fits(&self, len: usize) -> bool {
        if self.records == 0 {
            return true;
        }
        self.bytes.len() + 4 + len <= self.capacity
    }

    /// Append a record and return `(container, offset)` of its bytes.
    pub fn append(&mut self, record: &[u8]) -> Result<(ContainerId, u32)> {
        if self.records == 0 {
            self.bytes.clear();
            self.bytes.extend_from_slice(CONTAINER_MAGIC);
            self.bytes.push(CONTAINER_VERSION);
        }
        let offset = self.bytes.len() + 4;
        let len = u32::try_from(record.len())
            .map_err(|_| SealdupError::InvalidFormat("record exceeds 4 GiB".into()))?;
        let offset = u32::try_from(offset)
            .map_err(|_| SealdupError::InvalidFormat("container exceeds 4 GiB".into()))?;
        self.bytes.extend_from_slice(&len.to_le_bytes());
        self.bytes.extend_from_slice(record);
        self.records += 1;
        Ok((self.id, offset))
    }

    /// A record of the still-open container.
    pub fn read(&self, id: &ContainerId, offset: u32, length: u32) -> Option<&[u8]> {
        if *id != self.id || self.records == 0 {
            return None;
        }
        read_record(&self.bytes, offset, length).ok()
    }

    /// Finish the open container and start a fresh one. Returns `None` if
    /// nothing was appended.
    pub fn take(&mut self) -> Option<(ContainerId, Vec<u8>)> {
        if self.records == 0 {
            return None;
        }
        let finished = (self.id, std::mem::take(&mut self.bytes));
        self.id = ContainerId::generate();
        self.records = 0;
        Some(finished)
    }
}

/// Slice one record out of a finished container, checking the header and
/// the stored length prefix.
pub fn read_record(container: &[u8], offset: u32, length: u32) -> Result<&[u8]> {
    if container.len() < CONTAINER_HEADER_SIZE || &container[..8] != CONTAINER_MAGIC {
        return Err(SealdupError::InvalidFormat("bad container magic".into()));
    }
    if container[8] != CONTAINER_VERSION {
        return Err(SealdupError::InvalidFormat(format!(
            "unsupported container version {}",
            container[8]
        )));
    }
    let start = offset as usize;
    let end = start + length as usize;
    if start < CONTAINER_HEADER_SIZE + 4 || end > container.len() {
        return Err(SealdupError::InvalidFormat(format!(
            "record {start}..{end} outside container of {} bytes",
            container.len()
        )));
    }
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&container[start - 4..start]);
    if u32::from_le_bytes(prefix) != length {
        return Err(SealdupError::InvalidFormat(
            "record length does not match container".into(),
        ));
    }
    Ok(&container[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let mut w = ContainerWriter::new(ContainerKind::Base, 1024);
        let (id, a) = w.append(b"first").unwrap();
        let (_, b) = w.append(b"second").unwrap();
        assert_eq!(a as usize, CONTAINER_HEADER_SIZE + 4);
        assert_eq!(w.read(&id, a, 5), Some(&b"first"[..]));
        assert_eq!(w.read(&id, b, 6), Some(&b"second"[..]));

        let (taken_id, bytes) = w.take().unwrap();
        assert_eq!(taken_id, id);
        assert_eq!(read_record(&bytes, b, 6).unwrap(), b"second");
        assert!(w.read(&id, a, 5).is_none());
    }

    #[test]
    fn fits_respects_capacity() {
        let mut w = ContainerWriter::new(ContainerKind::Delta, 32);
        assert!(w.fits(1000));
        w.append(&[0u8; 10]).unwrap();
        assert!(w.fits(32 - CONTAINER_HEADER_SIZE - 4 - 10 - 4));
        assert!(!w.fits(20));
    }

    #[test]
    fn take_rotates_id() {
        let mut w = ContainerWriter::new(ContainerKind::Base, 64);
        assert!(w.take().is_none());
        let first = w.id();
        w.append(b"x").unwrap();
        w.take().unwrap();
        assert_ne!(w.id(), first);
        assert!(!w.has_pending());
    }

    #[test]
    fn read_record_rejects_bad_input() {
        let mut w = ContainerWriter::new(ContainerKind::Base, 64);
        let (_, off) = w.append(b"abc").unwrap();
        let (_, bytes) = w.take().unwrap();
        assert!(read_record(&bytes, off, 4).is_err());
        assert!(read_record(&bytes, off, 300).is_err());
        assert!(read_record(&bytes, 2, 1).is_err());
        assert!(read_record(b"NOTACONTAINER", 13, 0).is_err());
    }
}
