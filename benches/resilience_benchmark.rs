// Resilience Layer Performance Benchmarks
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serp_orchestrator::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use serp_orchestrator::clock::SystemClock;
use serp_orchestrator::cron::{CronCache, ParsedCron};
use serp_orchestrator::events::EventBus;
use serp_orchestrator::queue::{KeywordQueue, NewItem, QueueConfig};
use serp_orchestrator::rate_limiter::{LimitConfig, RateLimiter, RateLimiterConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn circuit_breaker_overhead(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cb = CircuitBreaker::new("benchmark_overhead", CircuitBreakerConfig::default());

    c.bench_function("circuit_breaker_success_call_overhead", |b| {
        b.to_async(&rt).iter(|| async {
            cb.execute(|| async { Ok::<i32, String>(black_box(42)) })
                .await
        });
    });
}

fn circuit_breaker_fast_fail(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cb = CircuitBreaker::new("benchmark_fast_fail", CircuitBreakerConfig::default());
    cb.force_open();

    c.bench_function("circuit_breaker_fast_fail_performance", |b| {
        b.to_async(&rt).iter(|| async {
            // Never runs the operation
            cb.execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<i32, String>(42)
            })
            .await
        });
    });
}

fn circuit_breaker_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("circuit_breaker_throughput");

    for concurrent_requests in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrent_requests),
            concurrent_requests,
            |b, &concurrent| {
                let cb = Arc::new(CircuitBreaker::new(
                    format!("benchmark_throughput_{}", concurrent),
                    CircuitBreakerConfig::default(),
                ));

                b.to_async(&rt).iter(|| {
                    let cb_clone = cb.clone();
                    async move {
                        let mut handles = vec![];
                        for i in 0..concurrent {
                            let cb = cb_clone.clone();
                            handles.push(tokio::spawn(async move {
                                cb.execute(|| async move { Ok::<i32, String>(i) }).await
                            }));
                        }
                        futures::future::join_all(handles).await
                    }
                });
            },
        );
    }
    group.finish();
}

fn rate_limiter_check(c: &mut Criterion) {
    let limits = LimitConfig::new(u32::MAX / 2, Duration::from_secs(1))
        .with_max_concurrent(u32::MAX)
        .with_min_delay(Duration::ZERO);
    let config = RateLimiterConfig {
        default_resource: limits.clone(),
        global: limits,
        emit_events: false,
        ..RateLimiterConfig::default()
    };
    let limiter = RateLimiter::new(config, SystemClock::shared(), EventBus::default()).unwrap();

    let mut group = c.benchmark_group("rate_limiter_check");
    for resources in [1usize, 16, 256].iter() {
        let names: Vec<String> = (0..*resources).map(|i| format!("engine-{}", i)).collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(resources),
            &names,
            |b, names| {
                let mut i = 0usize;
                b.iter(|| {
                    i = i.wrapping_add(1);
                    black_box(limiter.check_limit(&names[i % names.len()]))
                });
            },
        );
    }
    group.finish();
}

fn cron_next_after(c: &mut Criterion) {
    let start = chrono::Utc::now().with_timezone(&chrono_tz::UTC);
    let sparse = ParsedCron::parse("0 9 29 2 *").unwrap();
    let dense = ParsedCron::parse("*/5 9-17 * * 1-5").unwrap();

    c.bench_function("cron_next_after_dense", |b| {
        b.iter(|| black_box(dense.next_after(&start)))
    });
    c.bench_function("cron_next_after_leap_day", |b| {
        b.iter(|| black_box(sparse.next_after(&start)))
    });

    let cache = CronCache::new(64);
    c.bench_function("cron_cache_hit", |b| {
        b.iter(|| black_box(cache.get_or_parse("*/15 * * * *").unwrap()))
    });
}

fn queue_add_and_take(c: &mut Criterion) {
    c.bench_function("queue_add_1000_then_drain", |b| {
        b.iter(|| {
            let queue =
                KeywordQueue::new(QueueConfig::default(), SystemClock::shared(), EventBus::default())
                    .unwrap();
            let report = queue.add_bulk(
                (0..1000).map(|i| NewItem::new(format!("keyword {}", i)).with_priority(i % 7)),
            );
            black_box(report.added.len());
            while let Some(item) = queue.next() {
                let _ = queue.complete(item.id);
            }
        });
    });
}

criterion_group!(
    benches,
    circuit_breaker_overhead,
    circuit_breaker_fast_fail,
    circuit_breaker_throughput,
    rate_limiter_check,
    cron_next_after,
    queue_add_and_take
);
criterion_main!(benches);
