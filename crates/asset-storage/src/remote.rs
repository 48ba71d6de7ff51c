//! Backing store seams
//!
//! The manager never talks to an upstream store directly; it goes through
//! these two traits so the transport (and whether there is one) stays
//! outside this crate.

use crate::types::{Asset, CacheRule};
use async_trait::async_trait;
use partition_cache::AssetId;
use std::fmt;

/// Read side of the backing store
#[async_trait]
pub trait AssetReader: Send + Sync {
    /// Whether there is anywhere to read from at all
    fn has_upstream(&self) -> bool;

    /// Fetch an asset. `Ok(None)` is a confirmed miss.
    async fn get_asset(
        &self,
        id: AssetId,
        rule: CacheRule,
    ) -> std::result::Result<Option<Asset>, ReadError>;
}

/// Write side of the backing store
#[async_trait]
pub trait AssetWriter: Send + Sync {
    /// Store an asset, failing with [`WriteError::AlreadyExists`] if the
    /// store already holds that id.
    async fn put_asset(&self, asset: &Asset) -> std::result::Result<(), WriteError>;
}

#[derive(Debug)]
pub enum ReadError {
    Io(Box<std::io::Error>),
    Backend(String),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(err) => write!(f, "IO error: {}", err),
            ReadError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        ReadError::Io(Box::new(err))
    }
}

#[derive(Debug)]
pub enum WriteError {
    AlreadyExists(AssetId),
    Io(Box<std::io::Error>),
    Backend(String),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::AlreadyExists(id) => write!(f, "Asset {} already exists", id),
            WriteError::Io(err) => write!(f, "IO error: {}", err),
            WriteError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> Self {
        WriteError::Io(Box::new(err))
    }
}
