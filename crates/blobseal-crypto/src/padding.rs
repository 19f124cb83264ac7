//! Size bucketing for attachment plaintexts
//!
//! To obscure the true attachment size on the wire, the plaintext is padded
//! with zeros up to the next power of 1.05 (floored) before the PKCS#7 pass.
//! 1.05 keeps the number of buckets small without wasting many bytes.

/// Smallest bucket; everything up to this size pads to it.
pub const MIN_PADDED_SIZE: u64 = 541;

const GROWTH_FACTOR: f64 = 1.05;

/// Map an unpadded plaintext size to its padding bucket.
///
/// Deterministic, monotonic non-decreasing and idempotent.
pub fn padded_size(unpadded: u64) -> u64 {
    let exponent = ((unpadded as f64).ln() / GROWTH_FACTOR.ln()).ceil();
    let bucket = GROWTH_FACTOR.powf(exponent).floor();
    (bucket as u64).max(MIN_PADDED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_minimum_bucket() {
        assert_eq!(padded_size(0), 541);
        assert_eq!(padded_size(1), 541);
        assert_eq!(padded_size(100), 541);
        assert_eq!(padded_size(541), 541);
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(padded_size(542), 568);
        assert_eq!(padded_size(568), 568);
        assert_eq!(padded_size(569), 596);
    }

    #[test]
    fn test_large_sizes_stay_within_five_percent() {
        for size in [10_000u64, 1_000_000, 25 * 1024 * 1024, 100 * 1024 * 1024] {
            let bucket = padded_size(size);
            assert!(bucket >= size, "bucket {bucket} smaller than {size}");
            assert!(
                (bucket as f64) <= (size as f64) * GROWTH_FACTOR + 1.0,
                "bucket {bucket} too far above {size}"
            );
        }
    }

    proptest! {
        #[test]
        fn bucket_is_idempotent(size in 0u64..=1u64 << 32) {
            let bucket = padded_size(size);
            prop_assert_eq!(padded_size(bucket), bucket);
        }

        #[test]
        fn bucket_covers_size(size in 0u64..=1u64 << 32) {
            prop_assert!(padded_size(size) >= size);
        }

        #[test]
        fn bucket_is_monotonic(a in 0u64..=1u64 << 32, b in 0u64..=1u64 << 32) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(padded_size(lo) <= padded_size(hi));
        }
    }
}
