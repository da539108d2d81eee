use crate::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry, ServiceType};
use crate::clock::SharedClock;
use crate::events::{EngineEvent, EventBus};
use crate::executor::{ExecutorConfig, ExecutorError, ExecutorResult, RetryPolicy};
use crate::rate_limiter::RateLimiter;
use crate::scheduler::Schedule;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One unit of work submitted to the executor
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub id: Uuid,
    pub label: String,
    /// Rate-limited resource and breaker id; the configured default when unset
    pub resource: Option<String>,
    pub service_type: Option<ServiceType>,
    /// Overrides the configured attempt budget
    pub max_attempts: Option<u32>,
}

impl TaskRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            resource: None,
            service_type: None,
            max_attempts: None,
        }
    }

    /// Request for a fired schedule; `task.engine` selects the resource
    pub fn from_schedule(schedule: &Schedule) -> Self {
        let mut request = Self::new(schedule.label());
        if let Some(engine) = schedule.task.get("engine").and_then(|v| v.as_str()) {
            request.resource = Some(engine.to_string());
        }
        request
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Successful task result
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome<T> {
    pub task_id: Uuid,
    pub value: T,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Snapshot of an in-flight task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTaskInfo {
    pub task_id: Uuid,
    pub label: String,
    pub resource: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub retries: u64,
    pub active: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    retries: AtomicU64,
}

struct ActiveTask {
    token: CancellationToken,
    info: ActiveTaskInfo,
}

/// Removes the task from the active set however `execute` returns
struct ActiveGuard<'a> {
    executor: &'a TaskExecutor,
    task_id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.executor.active.lock().remove(&self.task_id);
    }
}

/// Runs work through rate-limit admission, a circuit breaker and retry backoff
pub struct TaskExecutor {
    config: ExecutorConfig,
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    clock: SharedClock,
    pub(super) events: EventBus,
    active: Mutex<HashMap<Uuid, ActiveTask>>,
    counters: Counters,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        limiter: Arc<RateLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
        clock: SharedClock,
        events: EventBus,
    ) -> ExecutorResult<Self> {
        config.validate()?;
        info!(
            max_concurrent = config.max_concurrent_tasks,
            max_attempts = config.max_attempts,
            "Task executor created"
        );
        Ok(Self {
            policy: config.retry_policy(),
            config,
            limiter,
            breakers,
            clock,
            events,
            active: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `action` until it succeeds, the attempt budget is spent or the task is cancelled.
    ///
    /// Every attempt first waits for rate-limit admission on the task's
    /// resource, then runs inside that resource's circuit breaker. Failed
    /// attempts sleep `base * multiplier^(attempt - 1)` before the next one.
    /// Cancellation is checked before each attempt and interrupts admission
    /// waits and backoff sleeps, never an attempt already running.
    pub async fn execute<T, E, F, Fut>(
        &self,
        request: TaskRequest,
        mut action: F,
    ) -> ExecutorResult<TaskOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let task_id = request.id;
        let resource = request
            .resource
            .clone()
            .unwrap_or_else(|| self.config.default_resource.clone());
        let service_type = request
            .service_type
            .unwrap_or(self.config.default_service_type);
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.policy.max_attempts)
            .max(1);

        let token = match self.register(&request, &resource) {
            Ok(token) => token,
            Err(err) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.events.publish(EngineEvent::TaskFailed {
                    task_id,
                    attempts: 0,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };
        let _guard = ActiveGuard {
            executor: self,
            task_id,
        };
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let started = self.clock.now();
        let breaker = self.breakers.get_breaker(service_type, &resource);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if token.is_cancelled() {
                return Err(self.cancelled(task_id, attempt - 1));
            }
            self.set_attempt(task_id, attempt);

            debug!(
                task_id = %task_id,
                task = %request.label,
                resource = %resource,
                attempt,
                max_attempts,
                "Executing task attempt"
            );

            let admitted = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(self.cancelled(task_id, attempt - 1)),
                admitted = self.limiter.acquire(&resource, Some(self.config.rate_limit_wait())) => admitted,
            };
            let permit = match admitted {
                Ok(permit) => permit,
                Err(err) => {
                    warn!(
                        task_id = %task_id,
                        resource = %resource,
                        error = %err,
                        "Task never admitted by rate limiter"
                    );
                    self.record_failure(task_id, attempt, err.to_string());
                    return Err(ExecutorError::RateLimited(err));
                }
            };

            let result = breaker.execute(|| action()).await;
            permit.release();

            let err = match result {
                Ok(value) => {
                    let duration_ms = (self.clock.now() - started).num_milliseconds().max(0) as u64;
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    info!(
                        task_id = %task_id,
                        task = %request.label,
                        attempts = attempt,
                        duration_ms,
                        "Task completed"
                    );
                    self.events.publish(EngineEvent::TaskCompleted {
                        task_id,
                        attempts: attempt,
                        duration_ms,
                    });
                    return Ok(TaskOutcome {
                        task_id,
                        value,
                        attempts: attempt,
                        duration_ms,
                    });
                }
                Err(err) => err,
            };

            let message = err.to_string();
            if attempt >= max_attempts {
                error!(
                    task_id = %task_id,
                    task = %request.label,
                    attempts = attempt,
                    error = %message,
                    "Task failed after all attempts"
                );
                self.record_failure(task_id, attempt, message.clone());
                return Err(match err {
                    CircuitBreakerError::Open {
                        service_type,
                        service_id,
                    } => ExecutorError::CircuitOpen {
                        service_type,
                        service_id,
                    },
                    _ => ExecutorError::RetryExhausted {
                        task: request.label.clone(),
                        attempts: attempt,
                        last_error: message,
                    },
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                task_id = %task_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Task attempt failed, backing off"
            );
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            self.events.publish(EngineEvent::TaskRetry {
                task_id,
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: message,
            });

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(self.cancelled(task_id, attempt)),
                _ = self.clock.sleep(delay) => {}
            }
        }
    }

    /// Mark a running task cancelled; it stops at its next suspension point
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match self.active.lock().get(&task_id) {
            Some(task) => {
                task.token.cancel();
                info!(task_id = %task_id, "Task cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every running task
    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock();
        for task in active.values() {
            task.token.cancel();
        }
        active.len()
    }

    pub fn is_cancelled(&self, task_id: Uuid) -> bool {
        self.active
            .lock()
            .get(&task_id)
            .map(|task| task.token.is_cancelled())
            .unwrap_or(false)
    }

    /// In-flight tasks, oldest first
    pub fn active_tasks(&self) -> Vec<ActiveTaskInfo> {
        let mut tasks: Vec<ActiveTaskInfo> = self
            .active
            .lock()
            .values()
            .map(|task| ActiveTaskInfo {
                cancelled: task.token.is_cancelled(),
                ..task.info.clone()
            })
            .collect();
        tasks.sort_by_key(|task| task.started_at);
        tasks
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            active: self.active_count(),
        }
    }

    fn register(&self, request: &TaskRequest, resource: &str) -> ExecutorResult<CancellationToken> {
        let mut active = self.active.lock();
        if active.contains_key(&request.id) {
            return Err(ExecutorError::Duplicate(request.id));
        }
        if active.len() >= self.config.max_concurrent_tasks {
            warn!(
                task = %request.label,
                max = self.config.max_concurrent_tasks,
                "Task rejected, executor at capacity"
            );
            return Err(ExecutorError::Capacity {
                max: self.config.max_concurrent_tasks,
            });
        }
        let token = CancellationToken::new();
        active.insert(
            request.id,
            ActiveTask {
                token: token.clone(),
                info: ActiveTaskInfo {
                    task_id: request.id,
                    label: request.label.clone(),
                    resource: resource.to_string(),
                    attempt: 0,
                    started_at: self.clock.now(),
                    cancelled: false,
                },
            },
        );
        Ok(token)
    }

    fn set_attempt(&self, task_id: Uuid, attempt: u32) {
        if let Some(task) = self.active.lock().get_mut(&task_id) {
            task.info.attempt = attempt;
        }
    }

    fn record_failure(&self, task_id: Uuid, attempts: u32, error: String) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.events.publish(EngineEvent::TaskFailed {
            task_id,
            attempts,
            error,
        });
    }

    fn cancelled(&self, task_id: Uuid, attempts: u32) -> ExecutorError {
        info!(task_id = %task_id, attempts, "Task cancelled");
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.events.publish(EngineEvent::TaskCancelled { task_id });
        ExecutorError::Cancelled(task_id)
    }
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .finish()
    }
}
