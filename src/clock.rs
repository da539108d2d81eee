//! Injectable time source.
//!
//! Every component that reasons about time (cron scanning, token refill,
//! breaker reset timeouts, monitor polling) reads the current instant and
//! sleeps through a [`Clock`]. Production code uses [`SystemClock`]; tests use
//! [`ManualClock`] and move time forward explicitly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Source of "now" plus the ability to wait for time to pass
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration` as measured by this clock
    async fn sleep(&self, duration: Duration);

    /// Suspend until this clock reaches `deadline`
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - self.now()).to_std().unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            self.sleep(remaining).await;
        }
    }
}

/// Wall clock backed by `chrono::Utc` and `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock that only moves when told to.
///
/// Sleepers wake once [`ManualClock::advance`] or [`ManualClock::set`] moves
/// time past their deadline.
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
    notify: Notify,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
            notify: Notify::new(),
        }
    }

    pub fn shared(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant;
        self.notify.notify_waiters();
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        {
            let mut now = self.now.write();
            *now += to_chrono(duration);
        }
        self.notify.notify_waiters();
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &*self.now.read())
            .finish()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + to_chrono(duration);
        self.sleep_until(deadline).await;
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.now() >= deadline {
                return;
            }
            notified.await;
        }
    }
}

/// Convert a std duration to a chrono one, saturating on overflow
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 14, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(start());
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_manual_sleep_wakes_on_advance() {
        let clock = ManualClock::shared(start());
        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move {
                clock.sleep(Duration::from_secs(10)).await;
                clock.now()
            })
        };

        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(4));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(6));
        let woke_at = sleeper.await.unwrap();
        assert!(woke_at >= start() + chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn test_sleep_until_past_deadline_returns_immediately() {
        let clock = ManualClock::new(start());
        clock.sleep_until(start() - chrono::Duration::minutes(1)).await;
    }

    #[tokio::test]
    async fn test_system_clock_sleep() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::from_millis(20)).await;
        assert!(clock.now() >= before);
    }
}
