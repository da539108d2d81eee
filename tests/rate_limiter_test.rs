// Rate limiter admission on a virtual clock

mod common;

use common::{advance_by, event_names, manual_clock, relaxed_limits};
use serp_orchestrator::events::EventBus;
use serp_orchestrator::rate_limiter::{
    LimitConfig, LimitReason, RateLimiter, RateLimiterConfig, RateLimiterError,
};
use std::time::Duration;
use tokio_test::assert_ok;

fn engine_limits(max: u32, window_secs: u64) -> LimitConfig {
    LimitConfig::new(max, Duration::from_secs(window_secs))
        .with_max_concurrent(10)
        .with_min_delay(Duration::ZERO)
}

#[tokio::test]
async fn test_engine_bucket_refills_continuously() {
    let clock = manual_clock();
    let config = relaxed_limits().with_resource("google", engine_limits(3, 60));
    let limiter = RateLimiter::new(config, clock.clone(), EventBus::default()).unwrap();

    for _ in 0..3 {
        assert!(limiter.check_limit("google").allowed);
    }
    let rejected = limiter.check_limit("google");
    assert!(!rejected.allowed);
    assert_eq!(rejected.reason, Some(LimitReason::EngineLimit));
    // one token every 20s
    assert_eq!(rejected.retry_after, Duration::from_secs(20));

    // other engines are unaffected
    assert!(limiter.check_limit("bing").allowed);

    clock.advance(Duration::from_secs(19));
    assert!(!limiter.check_limit("google").allowed);
    clock.advance(Duration::from_secs(1));
    assert!(limiter.check_limit("google").allowed);
}

#[tokio::test]
async fn test_min_delay_spaces_requests() {
    let clock = manual_clock();
    let limiter = RateLimiter::new(
        RateLimiterConfig::default(),
        clock.clone(),
        EventBus::default(),
    )
    .unwrap();

    let permit = assert_ok!(limiter.try_acquire("google"));
    permit.release();

    let spaced = limiter.check_limit("google");
    assert_eq!(spaced.reason, Some(LimitReason::MinDelay));
    assert_eq!(spaced.retry_after, Duration::from_secs(1));

    clock.advance(Duration::from_millis(1000));
    assert!(limiter.check_limit("google").allowed);
}

#[tokio::test]
async fn test_concurrency_limit_released_by_permit_drop() {
    let clock = manual_clock();
    let config = relaxed_limits().with_resource(
        "google",
        engine_limits(100, 60).with_max_concurrent(2),
    );
    let limiter = RateLimiter::new(config, clock, EventBus::default()).unwrap();

    let first = limiter.try_acquire("google").unwrap();
    let second = limiter.try_acquire("google").unwrap();
    assert_eq!(limiter.status("google").active_requests, 2);

    match limiter.try_acquire("google") {
        Err(RateLimiterError::Exceeded { reason, .. }) => {
            assert_eq!(reason, LimitReason::ConcurrentLimit)
        }
        other => panic!("expected concurrency rejection, got {:?}", other),
    }

    drop(first);
    assert_eq!(limiter.status("google").active_requests, 1);
    let third = limiter.try_acquire("google").unwrap();
    assert_eq!(third.resource(), "google");

    drop(second);
    drop(third);
    assert_eq!(limiter.stats().global_active_requests, 0);
}

#[tokio::test]
async fn test_global_limit_refunds_engine_token() {
    let clock = manual_clock();
    let mut config = relaxed_limits();
    config.global = engine_limits(2, 60).with_max_concurrent(100);
    let limiter = RateLimiter::new(config, clock, EventBus::default()).unwrap();

    assert!(limiter.check_limit("google").allowed);
    assert!(limiter.check_limit("bing").allowed);

    let rejected = limiter.check_limit("yahoo");
    assert_eq!(rejected.reason, Some(LimitReason::GlobalLimit));
    assert_eq!(rejected.retry_after, Duration::from_secs(30));

    let yahoo = limiter.status("yahoo");
    assert_eq!(yahoo.available_tokens, yahoo.max_tokens);
}

#[tokio::test]
async fn test_wait_for_limit_resolves_after_refill() {
    let clock = manual_clock();
    let config = relaxed_limits().with_resource("google", engine_limits(1, 10));
    let limiter = RateLimiter::new(config, clock.clone(), EventBus::default()).unwrap();
    assert!(limiter.check_limit("google").allowed);

    let (waited, _) = tokio::join!(
        limiter.wait_for_limit("google", Some(Duration::from_secs(30))),
        advance_by(&clock, Duration::from_secs(12), Duration::from_secs(1)),
    );
    assert!(assert_ok!(waited).allowed);
}

#[tokio::test]
async fn test_wait_for_limit_times_out() {
    let clock = manual_clock();
    let config = relaxed_limits().with_resource("google", engine_limits(1, 60));
    let limiter = RateLimiter::new(config, clock.clone(), EventBus::default()).unwrap();
    assert!(limiter.check_limit("google").allowed);

    let (waited, _) = tokio::join!(
        limiter.acquire("google", Some(Duration::from_secs(3))),
        advance_by(&clock, Duration::from_secs(5), Duration::from_secs(1)),
    );
    match waited {
        Err(RateLimiterError::Timeout { resource, waited_ms }) => {
            assert_eq!(resource, "google");
            assert_eq!(waited_ms, 3000);
        }
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
    assert_eq!(limiter.status("google").active_requests, 0);
}

#[tokio::test]
async fn test_decisions_counted_and_published() {
    let clock = manual_clock();
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let config = relaxed_limits().with_resource("google", engine_limits(1, 60));
    let limiter = RateLimiter::new(config, clock, events).unwrap();

    limiter.check_limit("google");
    limiter.check_limit("google");
    limiter.check_limit("google");

    assert_eq!(
        event_names(&mut rx),
        vec!["rate-limit:allowed", "rate-limit:rejected", "rate-limit:rejected"]
    );

    let stats = limiter.stats();
    assert_eq!(stats.total_checks, 3);
    assert_eq!(stats.allowed, 1);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.rejected_by_reason.get(&LimitReason::EngineLimit), Some(&2));
    assert_eq!(stats.tracked_resources, 1);
}

#[tokio::test]
async fn test_reset_refills_bucket() {
    let clock = manual_clock();
    let config = relaxed_limits().with_resource("google", engine_limits(2, 60));
    let limiter = RateLimiter::new(config, clock.clone(), EventBus::default()).unwrap();

    limiter.check_limit("google");
    limiter.check_limit("google");
    let drained = limiter.status("google");
    assert_eq!(drained.available_tokens, 0);
    assert_eq!(drained.full_at, clock_now(&clock) + chrono::Duration::seconds(60));

    limiter.reset("google");
    assert_eq!(limiter.status("google").available_tokens, 2);

    limiter.check_limit("google");
    limiter.reset_all();
    assert_eq!(limiter.status("google").available_tokens, 2);
}

fn clock_now(clock: &serp_orchestrator::clock::ManualClock) -> chrono::DateTime<chrono::Utc> {
    use serp_orchestrator::clock::Clock;
    clock.now()
}

#[test]
fn test_invalid_limits_rejected() {
    let mut config = RateLimiterConfig::default();
    config.default_resource.max_requests = 0;
    let result = RateLimiter::new(config, manual_clock(), EventBus::default());
    assert!(matches!(result, Err(RateLimiterError::InvalidConfig(_))));
}
