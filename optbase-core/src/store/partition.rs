use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of hash buckets on `symbol`.
pub const DEFAULT_BUCKETS: u32 = 10;

/// Hash partition on `symbol` composed with a value partition on `date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionScheme {
    pub buckets: u32,
}

impl Default for PartitionScheme {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
        }
    }
}

impl PartitionScheme {
    pub fn new(buckets: u32) -> Self {
        Self { buckets }
    }

    /// Bucket of `symbol`: BLAKE3 of the bytes, first 8 bytes little-endian,
    /// modulo the bucket count. Stable across processes.
    pub fn bucket_for(&self, symbol: &str) -> u32 {
        let hash = blake3::hash(symbol.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(head) % u64::from(self.buckets.max(1))) as u32
    }
}

impl fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HASH(symbol, {}) + VALUE(date)", self.buckets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_and_in_range() {
        let scheme = PartitionScheme::default();
        let b = scheme.bucket_for("AAPL");
        assert!(b < 10);
        assert_eq!(b, scheme.bucket_for("AAPL"));
        for sym in ["SPY", "QQQ", "TSLA", "MSFT", "NVDA", "AMZN"] {
            assert!(scheme.bucket_for(sym) < 10);
        }
    }

    #[test]
    fn single_bucket_maps_everything_to_zero() {
        let scheme = PartitionScheme::new(1);
        assert_eq!(scheme.bucket_for("AAPL"), 0);
        assert_eq!(scheme.bucket_for("SPY"), 0);
    }

    #[test]
    fn display_names_both_levels() {
        assert_eq!(PartitionScheme::new(16).to_string(), "HASH(symbol, 16) + VALUE(date)");
    }
}
