use anyhow::Context;
use serp_orchestrator::{
    circuit_breaker::CircuitBreakerRegistry,
    clock::SystemClock,
    config::Config,
    cron::CronCache,
    events::{EngineEvent, EventBus},
    executor::{ProcessOutcome, TaskExecutor},
    monitor::{ProcfsProbe, ResourceMonitor},
    queue::{KeywordQueue, QueuedItem},
    rate_limiter::RateLimiter,
    scheduler::{Schedule, TaskScheduler},
    AppError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pause between queue polls when there is nothing to do
const QUEUE_IDLE_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("serp_orchestrator={}", config.observability.log_level).into()
    });
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        "Starting {} v{}",
        config.observability.service_name,
        env!("CARGO_PKG_VERSION")
    );

    // Initialize Prometheus metrics
    let registry = prometheus::Registry::new();
    if config.observability.prometheus_enabled {
        if let Err(e) = serp_orchestrator::init_metrics(&registry) {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("✅ Prometheus metrics initialized");
        }
    } else {
        tracing::info!("⚠️  Prometheus metrics disabled in configuration");
    }

    // Shared plumbing
    let clock = SystemClock::shared();
    let events = EventBus::new(config.events.capacity);
    let cron = CronCache::new(config.scheduler.cron_cache_capacity);
    let shutdown = CancellationToken::new();

    // Initialize components
    let scheduler = TaskScheduler::new(config.scheduler.clone(), clock.clone(), events.clone(), cron)?;
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limiter.clone(),
        clock.clone(),
        events.clone(),
    )?);
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        config.circuit_breakers.clone(),
        clock.clone(),
        events.clone(),
    ));
    let queue = Arc::new(KeywordQueue::new(config.queue.clone(), clock.clone(), events.clone())?);
    let monitor = Arc::new(ResourceMonitor::new(
        config.monitor.clone(),
        Arc::new(ProcfsProbe),
        clock.clone(),
        events.clone(),
    )?);
    let executor = Arc::new(TaskExecutor::new(
        config.executor.clone(),
        limiter.clone(),
        breakers.clone(),
        clock.clone(),
        events.clone(),
    )?);
    tracing::info!("✅ Engine components initialized");

    // Restore schedules
    if let Some(path) = &config.scheduler.import_path {
        match std::fs::read_to_string(path) {
            Ok(json) => {
                let report = scheduler.import_json(&json)?;
                tracing::info!(
                    path = %path,
                    imported = report.imported.len(),
                    failed = report.failed.len(),
                    "✅ Schedules imported"
                );
            }
            Err(e) => tracing::warn!(path = %path, error = %e, "⚠️  Schedule import skipped"),
        }
    }

    let event_logger = spawn_event_logger(events.clone(), shutdown.clone());
    let listener = executor.spawn_schedule_listener(run_scheduled_task, shutdown.clone());
    let worker = spawn_queue_worker(
        executor.clone(),
        queue.clone(),
        config.executor.default_resource.clone(),
        shutdown.clone(),
    );

    if config.scheduler.enabled && scheduler.start() {
        tracing::info!("✅ Scheduler started");
    } else {
        tracing::info!("⚠️  Scheduler disabled in configuration");
    }
    if monitor.start() {
        tracing::info!("✅ Resource monitor started");
    }

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    tracing::info!("Shutting down gracefully...");

    scheduler.stop();
    monitor.stop();
    let cancelled = executor.cancel_all();
    shutdown.cancel();
    for joined in futures::future::join_all([listener, worker, event_logger]).await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!(cancelled_tasks = cancelled, "Executor drained");
    tracing::info!(stats = ?scheduler.get_stats(), "Scheduler stats");
    tracing::info!(stats = ?executor.stats(), "Executor stats");
    tracing::info!(stats = ?limiter.stats(), "Rate limiter stats");
    tracing::info!(stats = ?queue.stats(), "Queue stats");
    tracing::info!(metrics = ?breakers.aggregate_metrics(), "Circuit breaker metrics");

    if config.observability.prometheus_enabled {
        tracing::info!("Final metrics:\n{}", serp_orchestrator::gather_metrics(&registry));
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// The actual browsing runs outside this process; log what would be run
async fn run_scheduled_task(schedule: Schedule) -> Result<(), AppError> {
    tracing::info!(
        schedule_id = %schedule.id,
        run_count = schedule.run_count,
        task = %schedule.task,
        "Scheduled task dispatched"
    );
    Ok(())
}

async fn run_keyword(item: QueuedItem) -> Result<(), AppError> {
    tracing::info!(item_id = %item.id, keyword = %item.value, "Keyword dispatched");
    Ok(())
}

fn spawn_queue_worker(
    executor: Arc<TaskExecutor>,
    queue: Arc<KeywordQueue>,
    resource: String,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while !shutdown.is_cancelled() {
            let outcome = executor.process_next(&queue, &resource, run_keyword).await;
            if matches!(outcome, ProcessOutcome::Idle | ProcessOutcome::Busy) {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(QUEUE_IDLE_DELAY) => {}
                }
            } else {
                tracing::debug!(outcome = ?outcome, "Queue item processed");
            }
        }
    })
}

fn spawn_event_logger(events: EventBus, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event logger lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            match &envelope.event {
                EngineEvent::TaskFailed { task_id, error, .. } => {
                    tracing::warn!(task_id = %task_id, error = %error, "task:failed");
                }
                EngineEvent::CircuitOpen(circuit) => {
                    tracing::warn!(service = %circuit.key, reason = %circuit.reason, "circuit:open");
                }
                EngineEvent::ThrottleRecommended(recommendation) => {
                    tracing::info!(
                        action = recommendation.action.name(),
                        reason = %recommendation.reason,
                        "throttle:recommended"
                    );
                }
                _ => tracing::debug!(event = envelope.name, "Engine event"),
            }
        }
    })
}
