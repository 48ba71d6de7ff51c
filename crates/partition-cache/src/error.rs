//! Error types for the partition cache

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum CacheError {
    InvalidPath(String),
    InvalidInterval(Duration),
    Partition {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn partition(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Partition {
            op,
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidPath(msg) => write!(f, "Invalid cache path: {}", msg),
            CacheError::InvalidInterval(interval) => write!(
                f,
                "Invalid partition interval: {:?} (must be at least 1 second)",
                interval
            ),
            CacheError::Partition { op, path, source } => {
                write!(f, "Partition {} failed for {:?}: {}", op, path, source)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Partition { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
