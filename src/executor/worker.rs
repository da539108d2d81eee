//! Long-running consumers built on [`TaskExecutor::execute`]: the keyword
//! queue worker step and the `task:execute` listener.

use crate::events::EngineEvent;
use crate::executor::{ExecutorError, TaskExecutor, TaskRequest};
use crate::queue::{FailOutcome, KeywordQueue, QueuedItem};
use crate::scheduler::Schedule;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What `process_next` did with the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Nothing pending
    Idle,
    /// Concurrency cap reached; the item went back untouched
    Busy,
    Completed { item_id: Uuid },
    Requeued { item_id: Uuid, retry_count: u32 },
    Failed { item_id: Uuid, error: String },
    /// The item vanished from the queue while it was running
    Dropped { item_id: Uuid },
}

impl TaskExecutor {
    /// Take the next pending keyword, run `handler` once on it and report back to the queue.
    ///
    /// Retries are left to the queue's own budget, so the task runs a single
    /// attempt. Errors are recorded on the item, never returned. An item that
    /// never got a slot is released without spending a retry.
    pub async fn process_next<H, Fut, T, E>(
        &self,
        queue: &KeywordQueue,
        resource: &str,
        handler: H,
    ) -> ProcessOutcome
    where
        H: Fn(QueuedItem) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if self.active_count() >= self.config().max_concurrent_tasks {
            return ProcessOutcome::Busy;
        }
        let Some(item) = queue.next() else {
            return ProcessOutcome::Idle;
        };
        let item_id = item.id;

        let request = TaskRequest::new(item.value.clone())
            .with_resource(resource)
            .with_max_attempts(1);
        let result = self.execute(request, || handler(item.clone())).await;

        match result {
            Ok(_) => match queue.complete(item_id) {
                Ok(_) => ProcessOutcome::Completed { item_id },
                Err(err) => {
                    warn!(item_id = %item_id, error = %err, "Completed item no longer in queue");
                    ProcessOutcome::Dropped { item_id }
                }
            },
            // lost the last slot to another caller after the check above
            Err(ExecutorError::Capacity { .. }) => match queue.release(item_id) {
                Ok(_) => {
                    debug!(item_id = %item_id, "Executor full, keyword handed back");
                    ProcessOutcome::Busy
                }
                Err(err) => {
                    warn!(item_id = %item_id, error = %err, "Released item no longer in queue");
                    ProcessOutcome::Dropped { item_id }
                }
            },
            Err(task_err) => {
                let error = task_err.to_string();
                match queue.fail(item_id, Some(&error), true) {
                    Ok(FailOutcome::Requeued { retry_count }) => ProcessOutcome::Requeued {
                        item_id,
                        retry_count,
                    },
                    Ok(_) => ProcessOutcome::Failed { item_id, error },
                    Err(err) => {
                        warn!(item_id = %item_id, error = %err, "Failed item no longer in queue");
                        ProcessOutcome::Dropped { item_id }
                    }
                }
            }
        }
    }

    /// Run every `task:execute` event through `execute` until `shutdown` fires.
    ///
    /// Each fired schedule becomes its own task. Failures end up as
    /// `task:failed` events and a log line.
    pub fn spawn_schedule_listener<H, Fut, E>(
        self: &Arc<Self>,
        handler: H,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        H: Fn(Schedule) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut rx = self.events.subscribe();
        let executor = Arc::clone(self);
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            info!("Schedule listener started");
            loop {
                let received = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => received,
                };

                let schedule = match received {
                    Ok(envelope) => match envelope.event {
                        EngineEvent::TaskExecute(schedule) => *schedule,
                        _ => continue,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Schedule listener lagged behind the event bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let executor = Arc::clone(&executor);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let request = TaskRequest::from_schedule(&schedule);
                    let task_id = request.id;
                    let result = executor
                        .execute(request, || handler(schedule.clone()))
                        .await;
                    if let Err(err) = result {
                        warn!(
                            task_id = %task_id,
                            schedule_id = %schedule.id,
                            error = %err,
                            "Scheduled task did not complete"
                        );
                    }
                });
            }
            info!("Schedule listener stopped");
        })
    }
}
