//! Error types for asset storage

use partition_cache::{AssetId, CacheError};
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum StorageError {
    InvalidAssetId,
    DurabilityTimeout { id: AssetId, waited: Duration },
    Cache(CacheError),
    Io(Box<std::io::Error>),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidAssetId => write!(f, "Asset ID cannot be zero"),
            StorageError::DurabilityTimeout { id, waited } => write!(
                f,
                "Asset {} was not written to disk within {:?}",
                id, waited
            ),
            StorageError::Cache(err) => write!(f, "Cache error: {}", err),
            StorageError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Cache(err) => Some(err),
            StorageError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<CacheError> for StorageError {
    fn from(err: CacheError) -> Self {
        StorageError::Cache(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_asset_id_display() {
        assert_eq!(
            format!("{}", StorageError::InvalidAssetId),
            "Asset ID cannot be zero"
        );
    }

    #[test]
    fn test_durability_timeout_names_asset() {
        let id = AssetId::new_random();
        let err = StorageError::DurabilityTimeout {
            id,
            waited: Duration::from_secs(30),
        };
        assert!(format!("{}", err).contains(&id.to_string()));
    }

    #[test]
    fn test_cache_error_is_wrapped() {
        let err: StorageError = CacheError::InvalidPath("empty".to_string()).into();
        assert!(format!("{}", err).starts_with("Cache error:"));
    }
}
