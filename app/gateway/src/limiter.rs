//! Fixed-window rate limiter.
//!
//! Each identity owns one counter keyed by `floor(now / window)`. Counters
//! are process-local and lost on restart. Bursts straddling a window
//! boundary can reach `2 * max` requests.

use compact_str::CompactString;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request fits in the current window.
    Admitted {
        /// Requests left in this window after this one.
        remaining: u64,
    },
    /// The window is exhausted.
    Rejected {
        /// Milliseconds until the window rolls over.
        retry_after_ms: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    window_start: i64,
    count: u64,
}

/// Per-identity fixed-window counters.
#[derive(Debug)]
pub struct RateLimiter {
    window_ms: i64,
    max: u64,
    counters: Mutex<HashMap<CompactString, Counter>>,
}

impl RateLimiter {
    /// Create a limiter admitting `max` requests per `window_ms`.
    pub fn new(window_ms: u64, max: u64) -> Self {
        Self {
            window_ms: i64::try_from(window_ms).unwrap_or(i64::MAX).max(1),
            max,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `identity` at `now` (unix milliseconds).
    ///
    /// A counter left over from an earlier window is reset in place, so an
    /// identity never holds more than one counter.
    pub fn admit(&self, identity: &str, now: i64) -> Admission {
        let window_start = now - now.rem_euclid(self.window_ms);
        let mut counters = self.counters.lock();
        let counter = counters
            .entry(CompactString::from(identity))
            .or_insert(Counter {
                window_start,
                count: 0,
            });

        if counter.window_start != window_start {
            *counter = Counter {
                window_start,
                count: 0,
            };
        }

        counter.count = counter.count.saturating_add(1);
        if counter.count > self.max {
            let retry_after_ms = (window_start + self.window_ms - now).max(0);
            return Admission::Rejected {
                retry_after_ms: retry_after_ms as u64,
            };
        }

        Admission::Admitted {
            remaining: self.max - counter.count,
        }
    }

    /// Drop counters whose window ended at or before `now`.
    pub fn sweep(&self, now: i64) -> usize {
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, c| c.window_start + self.window_ms > now);
        before - counters.len()
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Whether no counters are held.
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_after_max_within_window() {
        let limiter = RateLimiter::new(60_000, 2);
        assert_eq!(
            limiter.admit("a", 1_000),
            Admission::Admitted { remaining: 1 }
        );
        assert_eq!(
            limiter.admit("a", 2_000),
            Admission::Admitted { remaining: 0 }
        );
        assert_eq!(
            limiter.admit("a", 3_000),
            Admission::Rejected {
                retry_after_ms: 57_000
            }
        );
    }

    #[test]
    fn next_window_admits_again() {
        let limiter = RateLimiter::new(60_000, 1);
        assert!(matches!(limiter.admit("a", 0), Admission::Admitted { .. }));
        assert!(matches!(
            limiter.admit("a", 59_999),
            Admission::Rejected { retry_after_ms: 1 }
        ));
        assert!(matches!(
            limiter.admit("a", 60_000),
            Admission::Admitted { .. }
        ));
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn identities_are_independent() {
        let limiter = RateLimiter::new(1_000, 1);
        assert!(matches!(limiter.admit("a", 10), Admission::Admitted { .. }));
        assert!(matches!(limiter.admit("b", 10), Admission::Admitted { .. }));
        assert!(matches!(limiter.admit("a", 11), Admission::Rejected { .. }));
    }

    #[test]
    fn boundary_burst_reaches_twice_max() {
        let limiter = RateLimiter::new(1_000, 3);
        let admitted = [997, 998, 999, 1_000, 1_001, 1_002]
            .into_iter()
            .map(|t| limiter.admit("a", t))
            .filter(|a| matches!(a, Admission::Admitted { .. }))
            .count();
        assert_eq!(admitted, 6);
    }

    #[test]
    fn sweep_drops_elapsed_windows() {
        let limiter = RateLimiter::new(1_000, 5);
        limiter.admit("old", 100);
        limiter.admit("new", 1_500);
        assert_eq!(limiter.sweep(1_000), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.sweep(2_000), 1);
        assert!(limiter.is_empty());
    }
}
