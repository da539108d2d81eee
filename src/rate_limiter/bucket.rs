use crate::clock::to_chrono;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Capacity counter refilled continuously at `max_tokens / window`.
///
/// Levels are kept in scaled integer units (one token is `window_ms` units and
/// every elapsed millisecond adds `max_tokens` units) so refill is exact.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBucket {
    level: u64,
    max_tokens: u32,
    window_ms: u64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// A full bucket admitting `max_tokens` per `window`
    pub fn new(max_tokens: u32, window: Duration, now: DateTime<Utc>) -> Self {
        let window_ms = (window.as_millis() as u64).max(1);
        Self {
            level: max_tokens as u64 * window_ms,
            max_tokens,
            window_ms,
            last_refill: now,
        }
    }

    fn capacity(&self) -> u64 {
        self.max_tokens as u64 * self.window_ms
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill).num_milliseconds();
        if elapsed_ms > 0 {
            let added = (elapsed_ms as u64).saturating_mul(self.max_tokens as u64);
            self.level = self.level.saturating_add(added).min(self.capacity());
            self.last_refill = now;
        }
    }

    /// Take one token if available
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> bool {
        self.refill(now);
        if self.level >= self.window_ms {
            self.level -= self.window_ms;
            true
        } else {
            false
        }
    }

    /// Return tokens taken by a request that was not admitted after all
    pub fn refund(&mut self, count: u32) {
        self.level = self
            .level
            .saturating_add(count as u64 * self.window_ms)
            .min(self.capacity());
    }

    /// Whole tokens available at `now`
    pub fn available(&mut self, now: DateTime<Utc>) -> u32 {
        self.refill(now);
        (self.level / self.window_ms) as u32
    }

    /// Time until one whole token is available
    pub fn time_until_token(&mut self, now: DateTime<Utc>) -> Duration {
        self.refill(now);
        if self.level >= self.window_ms || self.max_tokens == 0 {
            return Duration::ZERO;
        }
        let missing = self.window_ms - self.level;
        Duration::from_millis(missing.div_ceil(self.max_tokens as u64))
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Refill to capacity
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.level = self.capacity();
        self.last_refill = now;
    }

    /// Instant the bucket is next full
    pub fn full_at(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.refill(now);
        if self.max_tokens == 0 {
            return now;
        }
        let missing = self.capacity() - self.level;
        now + to_chrono(Duration::from_millis(
            missing.div_ceil(self.max_tokens as u64),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_exhaust_and_refill() {
        let mut bucket = TokenBucket::new(30, Duration::from_secs(60), t0());
        for _ in 0..30 {
            assert!(bucket.try_consume(t0()));
        }
        assert!(!bucket.try_consume(t0()));

        // one token every two seconds
        assert_eq!(bucket.time_until_token(t0()), Duration::from_secs(2));
        let later = t0() + chrono::Duration::seconds(2);
        assert!(bucket.try_consume(later));
        assert!(!bucket.try_consume(later));
    }

    #[test]
    fn test_partial_refill_not_enough() {
        let mut bucket = TokenBucket::new(30, Duration::from_secs(60), t0());
        for _ in 0..30 {
            bucket.try_consume(t0());
        }
        let almost = t0() + chrono::Duration::milliseconds(1999);
        assert!(!bucket.try_consume(almost));
        assert_eq!(bucket.time_until_token(almost), Duration::from_millis(1));
    }

    #[test]
    fn test_refill_caps_at_max() {
        let mut bucket = TokenBucket::new(5, Duration::from_secs(10), t0());
        bucket.try_consume(t0());
        let much_later = t0() + chrono::Duration::hours(1);
        assert_eq!(bucket.available(much_later), 5);
    }

    #[test]
    fn test_refund_is_bounded() {
        let mut bucket = TokenBucket::new(2, Duration::from_secs(10), t0());
        assert!(bucket.try_consume(t0()));
        bucket.refund(5);
        assert_eq!(bucket.available(t0()), 2);
    }

    #[test]
    fn test_full_at() {
        let mut bucket = TokenBucket::new(10, Duration::from_secs(10), t0());
        for _ in 0..10 {
            bucket.try_consume(t0());
        }
        assert_eq!(bucket.full_at(t0()), t0() + chrono::Duration::seconds(10));
    }
}
