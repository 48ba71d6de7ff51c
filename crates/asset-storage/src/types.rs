//! Core asset types

use partition_cache::AssetId;
use std::fmt;

/// An asset and its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub data: Vec<u8>,
}

impl Asset {
    pub fn new(id: AssetId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Whether a reader may populate the local cache with what it fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRule {
    Normal,
    SkipWrite,
}

/// Outcome of a store request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    Done,
    Duplicate,
    Failure,
}

impl fmt::Display for PutResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutResult::Done => write!(f, "DONE"),
            PutResult::Duplicate => write!(f, "DUPLICATE"),
            PutResult::Failure => write!(f, "FAILURE"),
        }
    }
}
