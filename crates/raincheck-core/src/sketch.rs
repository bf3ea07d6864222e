//! Flajolet-Martin-style rank estimation.
//!
//! Gives clients a coarse "how many distinct earlier-or-equal clients are
//! ahead of you" figure without exposing exact queue positions. The
//! estimate is probabilistic and deliberately approximate; it trades
//! accuracy for privacy and for O(1) state.
//!
//! Bucket selection hashes the client id and counts trailing zero bits of
//! the 32-bit digest prefix. Hashing (rather than using raw address bits)
//! keeps the bit distribution uniform, which the FM estimate depends on;
//! the estimator formula itself is untouched.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::{ClientId, Priority};

/// Number of buckets; one per possible trailing-zero count of a 32-bit
/// hash.
pub const SKETCH_SIZE: usize = 32;

/// Flajolet-Martin correction factor for the first-empty-bucket estimate.
const CORRECTION_FACTOR: f64 = 1.2928;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Smallest priority observed for this index within the freshness
    /// interval.
    best_priority: u64,
    /// Last update, Unix-epoch milliseconds. Zero means never touched.
    touched_at_ms: u64,
}

/// Approximate count-ahead estimator.
///
/// A bucket is *stale* when it has not been updated within the freshness
/// interval; stale buckets are treated as empty by both reads and writes.
/// A single mutex serializes all access.
#[derive(Debug)]
pub struct RankEstimator {
    interval_ms: u64,
    buckets: Mutex<[Bucket; SKETCH_SIZE]>,
}

impl RankEstimator {
    /// Create an estimator whose entries go stale after `interval_ms`
    /// milliseconds.
    #[must_use]
    pub const fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            buckets: Mutex::new([Bucket {
                best_priority: 0,
                touched_at_ms: 0,
            }; SKETCH_SIZE]),
        }
    }

    /// Record a client's priority at wall-clock time `now_ms`.
    ///
    /// The bucket keeps the smallest (earliest) priority seen; a stale
    /// bucket is overwritten unconditionally.
    pub fn observe(&self, client_id: &ClientId, priority: Priority, now_ms: u64) {
        let index = bucket_index(client_id);
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[index];

        if self.is_stale(bucket, now_ms) || bucket.best_priority > priority.as_unix_ms() {
            bucket.best_priority = priority.as_unix_ms();
            bucket.touched_at_ms = now_ms;
        }
    }

    /// Estimate how many distinct clients with priority `<= priority` have
    /// been observed recently.
    ///
    /// Scans buckets in index order and returns `2^i * 1.2928` for the
    /// first `i` that is stale or holds a priority at or past the query.
    /// `None` means every bucket is fresh and strictly ahead of the query,
    /// i.e. the estimate saturated.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rank(&self, priority: Priority, now_ms: u64) -> Option<f64> {
        let buckets = self.buckets.lock();
        buckets.iter().enumerate().find_map(|(i, bucket)| {
            if self.is_stale(bucket, now_ms) || bucket.best_priority >= priority.as_unix_ms() {
                Some(f64::exp2(i as f64) * CORRECTION_FACTOR)
            } else {
                None
            }
        })
    }

    const fn is_stale(&self, bucket: &Bucket, now_ms: u64) -> bool {
        bucket.touched_at_ms < now_ms.saturating_sub(self.interval_ms)
    }
}

/// Trailing-zero count of the first four bytes of `SHA-256(client_id)`,
/// capped to the last bucket.
fn bucket_index(client_id: &ClientId) -> usize {
    let digest = Sha256::digest(client_id.as_str().as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (prefix.trailing_zeros() as usize).min(SKETCH_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_000_000;

    /// Find a client id hashing to the requested bucket index.
    fn client_for_bucket(index: usize) -> ClientId {
        (0u32..)
            .map(|n| ClientId::new(format!("198.51.{}.{}", n / 256, n % 256)))
            .find(|c| bucket_index(c) == index)
            .expect("searched id space is large enough")
    }

    #[test]
    fn empty_sketch_estimates_one() {
        let sketch = RankEstimator::new(11_000);
        // All buckets stale, so the scan stops at index 0.
        let rank = sketch.rank(Priority::from_unix_ms(NOW), NOW).unwrap();
        assert!((rank - CORRECTION_FACTOR).abs() < f64::EPSILON);
    }

    #[test]
    fn rank_is_monotone_in_priority() {
        let sketch = RankEstimator::new(11_000);
        // Earliest priority in bucket 0, latest in bucket 3, so deeper
        // queries walk further into the sketch.
        for i in 0..4u64 {
            sketch.observe(
                &client_for_bucket(i as usize),
                Priority::from_unix_ms(NOW - 100 * (4 - i)),
                NOW,
            );
        }

        let mut previous = 0.0;
        for p in [NOW - 500, NOW - 350, NOW - 150, NOW, NOW + 500] {
            let rank = sketch
                .rank(Priority::from_unix_ms(p), NOW)
                .unwrap_or(f64::INFINITY);
            assert!(rank >= previous, "rank must not decrease as priority grows");
            previous = rank;
        }
    }

    #[test]
    fn fresh_earlier_buckets_raise_the_estimate() {
        let sketch = RankEstimator::new(11_000);
        sketch.observe(&client_for_bucket(0), Priority::from_unix_ms(NOW - 900), NOW);
        sketch.observe(&client_for_bucket(1), Priority::from_unix_ms(NOW - 800), NOW);

        // Both buckets are fresh and ahead of a late arrival: scan passes
        // them and lands on bucket 2.
        let rank = sketch.rank(Priority::from_unix_ms(NOW), NOW).unwrap();
        assert!((rank - 4.0 * CORRECTION_FACTOR).abs() < f64::EPSILON);

        // An arrival earlier than everything observed stops at bucket 0.
        let rank = sketch.rank(Priority::from_unix_ms(NOW - 1_000), NOW).unwrap();
        assert!((rank - CORRECTION_FACTOR).abs() < f64::EPSILON);
    }

    #[test]
    fn stale_buckets_read_as_empty() {
        let sketch = RankEstimator::new(1_000);
        sketch.observe(&client_for_bucket(0), Priority::from_unix_ms(NOW - 10), NOW);

        let later = NOW + 2_000;
        let rank = sketch.rank(Priority::from_unix_ms(later), later).unwrap();
        assert!((rank - CORRECTION_FACTOR).abs() < f64::EPSILON);
    }

    #[test]
    fn bucket_keeps_smallest_priority_until_stale() {
        let sketch = RankEstimator::new(11_000);
        let client = client_for_bucket(0);

        sketch.observe(&client, Priority::from_unix_ms(NOW - 500), NOW);
        // A later priority for the same bucket must not displace the
        // earlier one while fresh.
        sketch.observe(&client, Priority::from_unix_ms(NOW - 100), NOW + 10);

        // Stored NOW-500 is strictly ahead of the query, so the scan passes
        // bucket 0 and stops at the stale bucket 1.
        let rank = sketch.rank(Priority::from_unix_ms(NOW - 300), NOW + 20).unwrap();
        assert!((rank - 2.0 * CORRECTION_FACTOR).abs() < f64::EPSILON);

        // Once stale, the bucket accepts the later priority, and the same
        // query now stops at bucket 0.
        let later = NOW + 20_000;
        sketch.observe(&client, Priority::from_unix_ms(NOW - 100), later);
        let rank = sketch.rank(Priority::from_unix_ms(NOW - 300), later).unwrap();
        assert!((rank - CORRECTION_FACTOR).abs() < f64::EPSILON);
    }
}
