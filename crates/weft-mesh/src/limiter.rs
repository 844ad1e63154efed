//! Per-destination outbound rate limiting.
//!
//! A token bucket per key with two refill windows (minute and hour).
//! `try_acquire` is wait-free: window state is atomics, and the bucket map
//! only takes a write lock the first time a key appears.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use weft_types::PeerId;

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;

struct Window {
    start_ms: AtomicU64,
    count: AtomicU32,
    limit: u32,
    span_ms: u64,
}

impl Window {
    fn new(limit: u32, span_ms: u64) -> Self {
        Self {
            start_ms: AtomicU64::new(0),
            count: AtomicU32::new(0),
            limit,
            span_ms,
        }
    }

    /// Count one event if the window has room. Lock-free.
    fn try_count(&self, now_ms: u64) -> bool {
        let start = self.start_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(start) >= self.span_ms {
            // Window rolled over; one thread wins the reset, the rest see
            // the fresh window through the count CAS below.
            if self
                .start_ms
                .compare_exchange(start, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.count.store(0, Ordering::Release);
            }
        }
        loop {
            let current = self.count.load(Ordering::Acquire);
            if current >= self.limit {
                return false;
            }
            if self
                .count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Undo a count taken by `try_count` (used when the sibling window
    /// refuses).
    fn uncount(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }
}

struct Bucket {
    minute: Window,
    hour: Window,
}

/// Token-bucket rate limiter keyed by destination peer.
pub struct RateLimiter {
    per_minute: u32,
    per_hour: u32,
    buckets: RwLock<HashMap<PeerId, Arc<Bucket>>>,
}

impl RateLimiter {
    /// Create a limiter with the given per-minute and per-hour budgets.
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute,
            per_hour,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket(&self, key: PeerId) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.read().expect("limiter lock").get(&key) {
            return Arc::clone(bucket);
        }
        let mut guard = self.buckets.write().expect("limiter lock");
        Arc::clone(guard.entry(key).or_insert_with(|| {
            Arc::new(Bucket {
                minute: Window::new(self.per_minute, MINUTE_MS),
                hour: Window::new(self.per_hour, HOUR_MS),
            })
        }))
    }

    /// Try to spend one token for `key` at `now_ms`.
    ///
    /// Both windows must have room; a refusal leaves neither window
    /// charged.
    pub fn try_acquire(&self, key: PeerId, now_ms: u64) -> bool {
        let bucket = self.bucket(key);
        if !bucket.minute.try_count(now_ms) {
            return false;
        }
        if !bucket.hour.try_count(now_ms) {
            bucket.minute.uncount();
            return false;
        }
        true
    }

    /// Drop state for keys no longer of interest.
    pub fn forget(&self, key: &PeerId) {
        self.buckets.write().expect("limiter lock").remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn test_denies_61st_in_minute() {
        let limiter = RateLimiter::new(60, 1000);
        let now = 1_000_000;
        for _ in 0..60 {
            assert!(limiter.try_acquire(pid(1), now));
        }
        assert!(!limiter.try_acquire(pid(1), now));
    }

    #[test]
    fn test_minute_window_rolls_over() {
        let limiter = RateLimiter::new(2, 1000);
        assert!(limiter.try_acquire(pid(1), 0));
        assert!(limiter.try_acquire(pid(1), 0));
        assert!(!limiter.try_acquire(pid(1), 0));
        // Next minute: fresh budget.
        assert!(limiter.try_acquire(pid(1), MINUTE_MS));
    }

    #[test]
    fn test_hour_budget_caps_across_minutes() {
        let limiter = RateLimiter::new(60, 100);
        let mut granted = 0;
        for minute in 0..3 {
            for _ in 0..60 {
                if limiter.try_acquire(pid(1), minute * MINUTE_MS) {
                    granted += 1;
                }
            }
        }
        assert_eq!(granted, 100);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, 1000);
        assert!(limiter.try_acquire(pid(1), 0));
        assert!(!limiter.try_acquire(pid(1), 0));
        assert!(limiter.try_acquire(pid(2), 0));
    }

    #[test]
    fn test_refusal_does_not_charge_minute() {
        let limiter = RateLimiter::new(10, 1);
        assert!(limiter.try_acquire(pid(1), 0));
        // Hour window exhausted; minute window must not leak counts.
        for _ in 0..5 {
            assert!(!limiter.try_acquire(pid(1), 0));
        }
        // New hour: minute window still has room because refusals were
        // uncounted.
        assert!(limiter.try_acquire(pid(1), HOUR_MS));
    }
}
