//! Cache types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use uuid::Uuid;

/// 128-bit asset identifier.
///
/// The canonical text form is 32 lowercase hex digits without hyphens, which
/// is also the form prefix queries match against. Byte ordering of the
/// underlying UUID matches the lexical ordering of that text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    pub const NIL: AssetId = AssetId(Uuid::nil());

    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Inclusive id range covering every id whose hex form starts with `prefix`.
    ///
    /// Returns `None` when the prefix is longer than 32 digits or contains
    /// anything other than lowercase hex digits.
    pub fn prefix_range(prefix: &str) -> Option<RangeInclusive<AssetId>> {
        if prefix.len() > 32 || !prefix.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }

        let pad = 32 - prefix.len();
        let low = format!("{}{}", prefix, "0".repeat(pad));
        let high = format!("{}{}", prefix, "f".repeat(pad));

        let low = u128::from_str_radix(&low, 16).ok()?;
        let high = u128::from_str_radix(&high, 16).ok()?;
        Some(AssetId::from_u128(low)..=AssetId::from_u128(high))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for AssetId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Result of a partition retirement pass
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    /// Evicted ids and the sizes they had
    pub evicted: HashMap<AssetId, u64>,
    /// Sum of evicted sizes
    pub bytes_cleared: u64,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub partitions: usize,
    pub total_size: u64,
}
