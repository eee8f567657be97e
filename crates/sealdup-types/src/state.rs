use serde::{Deserialize, Serialize};

use crate::error::{Result, SealdupError};

/// Dedup decision for one chunk of a batch.
///
/// `Unique` and `Duplicate` are decided against the global indexes;
/// the `Temp*` states mark a repeat inside the same batch and inherit the
/// decision of the earlier occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DedupState {
    Unique = 0,
    Duplicate = 1,
    TempUnique = 2,
    TempDuplicate = 3,
}

impl DedupState {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Unique),
            1 => Ok(Self::Duplicate),
            2 => Ok(Self::TempUnique),
            3 => Ok(Self::TempDuplicate),
            _ => Err(SealdupError::InvalidDedupState(v)),
        }
    }

    pub fn is_batch_local(self) -> bool {
        matches!(self, Self::TempUnique | Self::TempDuplicate)
    }

    /// State assigned to a repeat of a chunk first seen in state `self`.
    ///
    /// Only a first occurrence can be repeated; repeats always point at the
    /// first occurrence, so a `Temp*` state here means corrupted batch state.
    pub fn repeated(self) -> Result<Self> {
        match self {
            Self::Unique => Ok(Self::TempUnique),
            Self::Duplicate => Ok(Self::TempDuplicate),
            other => Err(SealdupError::InvalidDedupState(other as u8)),
        }
    }
}
