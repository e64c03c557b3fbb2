//! CRC32 checksum over the top of the book
//!
//! Used to fingerprint local book state for integrity logging and
//! cross-checking two reconstructions of the same feed.
//!
//! # Algorithm
//!
//! 1. Take the top `depth` bids (high→low) then the top `depth` asks (low→high)
//! 2. Render each level as `"{price}:{qty}"` using the decimal's natural
//!    string form (trailing zeros as stored on the wire are preserved)
//! 3. Join all entries with `":"` and CRC32 the resulting bytes
//!
//! Both reconstructions must therefore store prices at the precision the
//! venue sent them, which the wire types guarantee.

use crc32fast::Hasher;
use liquidity_types::Level;

/// Number of levels per side the checksum covers by default
pub const DEFAULT_CHECKSUM_DEPTH: usize = 10;

/// Compute the CRC32 checksum over the top `depth` levels of each side
///
/// # Arguments
///
/// * `bids` - bid levels sorted high to low (best bid first)
/// * `asks` - ask levels sorted low to high (best ask first)
/// * `depth` - levels per side to include
pub fn compute_checksum(bids: &[Level], asks: &[Level], depth: usize) -> u32 {
    let mut parts: Vec<String> = Vec::with_capacity(depth * 2);

    for bid in bids.iter().take(depth) {
        parts.push(format!("{}:{}", bid.price, bid.qty));
    }
    for ask in asks.iter().take(depth) {
        parts.push(format!("{}:{}", ask.price, ask.qty));
    }

    let payload = parts.join(":");
    let mut hasher = Hasher::new();
    hasher.update(payload.as_bytes());
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_checksum_deterministic() {
        let bids = vec![
            Level::new(dec!(100.0), dec!(1.5)),
            Level::new(dec!(99.5), dec!(2.5)),
        ];
        let asks = vec![
            Level::new(dec!(100.5), dec!(1.0)),
            Level::new(dec!(101.0), dec!(2.0)),
        ];

        let checksum = compute_checksum(&bids, &asks, 10);
        assert!(checksum > 0);
        assert_eq!(checksum, compute_checksum(&bids, &asks, 10));
    }

    #[test]
    fn test_checksum_order_matters() {
        let a = Level::new(dec!(100), dec!(1));
        let b = Level::new(dec!(101), dec!(2));

        let checksum1 = compute_checksum(&[a.clone()], &[b.clone()], 10);
        let checksum2 = compute_checksum(&[b], &[a], 10);

        assert_ne!(checksum1, checksum2);
    }

    #[test]
    fn test_checksum_respects_depth() {
        let mut bids: Vec<Level> = (1..=15)
            .map(|i| Level::new(Decimal::from(100 - i), dec!(1)))
            .collect();
        let mut asks: Vec<Level> = (1..=15)
            .map(|i| Level::new(Decimal::from(100 + i), dec!(1)))
            .collect();

        let checksum1 = compute_checksum(&bids, &asks, 10);

        // Levels beyond the depth cutoff must not change the hash
        bids.push(Level::new(dec!(1), dec!(1)));
        asks.push(Level::new(dec!(200), dec!(1)));
        let checksum2 = compute_checksum(&bids, &asks, 10);

        assert_eq!(checksum1, checksum2);

        // But a shallower depth sees different data
        assert_ne!(checksum1, compute_checksum(&bids, &asks, 5));
    }

    #[test]
    fn test_checksum_sensitive_to_precision() {
        // "100" and "100.0" are different payloads on purpose: the stored
        // precision is part of the book's identity
        let one = compute_checksum(&[Level::new(dec!(100), dec!(1))], &[], 10);
        let other = compute_checksum(&[Level::new(dec!(100.0), dec!(1))], &[], 10);
        assert_ne!(one, other);
    }

    #[test]
    fn test_checksum_empty_book() {
        assert_eq!(compute_checksum(&[], &[], 10), 0);
    }
}
