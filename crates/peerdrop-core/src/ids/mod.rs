//! Unique numeric identifiers for groups and transactions.

use std::sync::atomic::{AtomicI64, Ordering};

/// A source of identifiers that never repeats within the process lifetime.
pub trait UniqueNumberSource: Send + Sync {
    /// Next identifier. Strictly greater than every value returned before.
    fn next(&self) -> i64;
}

/// Monotonic counter seeded from the wall clock.
///
/// Seeding with the current time in milliseconds keeps identifiers from
/// consecutive runs apart in practice; the atomic increment guarantees
/// distinct values within a run, even for calls in the same millisecond.
#[derive(Debug)]
pub struct MonotonicIds {
    last: AtomicI64,
}

impl MonotonicIds {
    /// Create a source seeded from the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    /// Create a source whose first value is `seed + 1`.
    #[must_use]
    pub const fn starting_at(seed: i64) -> Self {
        Self {
            last: AtomicI64::new(seed),
        }
    }

    /// Create a source that hands out values above both the current time
    /// and `floor`, typically the highest id already persisted.
    #[must_use]
    pub fn seeded_above(floor: i64) -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis().max(floor))
    }
}

impl Default for MonotonicIds {
    fn default() -> Self {
        Self::new()
    }
}

impl UniqueNumberSource for MonotonicIds {
    fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl<T: UniqueNumberSource + ?Sized> UniqueNumberSource for &T {
    fn next(&self) -> i64 {
        (**self).next()
    }
}

impl<T: UniqueNumberSource + ?Sized> UniqueNumberSource for std::sync::Arc<T> {
    fn next(&self) -> i64 {
        (**self).next()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_strictly_increasing() {
        let ids = MonotonicIds::starting_at(10);
        assert_eq!(ids.next(), 11);
        assert_eq!(ids.next(), 12);
    }

    #[test]
    fn test_distinct_across_threads() {
        let ids = Arc::new(MonotonicIds::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_seeded_above_persisted_ids() {
        let far_future = chrono::Utc::now().timestamp_millis() + 1_000_000;
        assert_eq!(MonotonicIds::seeded_above(far_future).next(), far_future + 1);
        assert!(MonotonicIds::seeded_above(0).next() > 1);
    }
}
