//! Snapshot contract for durable engine state.
//!
//! The engine never touches storage itself. It exports schedules, queue
//! contents and breaker state as plain serde values and hands them to a
//! [`SnapshotStore`] supplied by the embedding application.

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerSnapshot};
use crate::error::Result;
use crate::queue::{ImportSummary, KeywordQueue, QueueSnapshot};
use crate::scheduler::{ImportReport, ScheduleRecord, TaskScheduler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Storage backend for engine snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_schedules(&self, records: &[ScheduleRecord]) -> Result<()>;

    async fn load_schedules(&self) -> Result<Vec<ScheduleRecord>>;

    async fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()>;

    async fn load_queue(&self) -> Result<Option<QueueSnapshot>>;

    async fn save_breakers(&self, snapshots: &[CircuitBreakerSnapshot]) -> Result<()>;

    async fn load_breakers(&self) -> Result<Vec<CircuitBreakerSnapshot>>;

    /// Save every part of an engine snapshot
    async fn save_engine(&self, snapshot: &EngineSnapshot) -> Result<()> {
        self.save_schedules(&snapshot.schedules).await?;
        if let Some(queue) = &snapshot.queue {
            self.save_queue(queue).await?;
        }
        self.save_breakers(&snapshot.breakers).await?;
        Ok(())
    }

    /// Assemble an engine snapshot from the stored parts
    async fn load_engine(&self, taken_at: DateTime<Utc>) -> Result<EngineSnapshot> {
        Ok(EngineSnapshot {
            schedules: self.load_schedules().await?,
            queue: self.load_queue().await?,
            breakers: self.load_breakers().await?,
            taken_at,
        })
    }
}

/// Everything needed to rebuild the engine's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub schedules: Vec<ScheduleRecord>,
    pub queue: Option<QueueSnapshot>,
    pub breakers: Vec<CircuitBreakerSnapshot>,
    pub taken_at: DateTime<Utc>,
}

/// What `EngineSnapshot::restore` brought back
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub schedules: ImportReport,
    pub queue: Option<ImportSummary>,
    pub breakers: usize,
}

impl EngineSnapshot {
    pub fn capture(
        scheduler: &TaskScheduler,
        queue: &KeywordQueue,
        breakers: &CircuitBreakerRegistry,
        taken_at: DateTime<Utc>,
    ) -> Self {
        let snapshot = Self {
            schedules: scheduler.export_schedules(),
            queue: Some(queue.export_state()),
            breakers: breakers.export_snapshots(),
            taken_at,
        };
        debug!(
            schedules = snapshot.schedules.len(),
            breakers = snapshot.breakers.len(),
            "Engine snapshot captured"
        );
        snapshot
    }

    /// Load the snapshot into live components. Queue items are merged with
    /// whatever is already queued.
    pub fn restore(
        &self,
        scheduler: &TaskScheduler,
        queue: &KeywordQueue,
        breakers: &CircuitBreakerRegistry,
    ) -> RestoreReport {
        let report = RestoreReport {
            schedules: scheduler.import_schedules(self.schedules.clone()),
            queue: self
                .queue
                .clone()
                .map(|snapshot| queue.import_state(snapshot, true)),
            breakers: breakers.import_snapshots(&self.breakers),
        };
        info!(
            schedules = report.schedules.imported.len(),
            schedule_failures = report.schedules.failed.len(),
            queue_items = report.queue.as_ref().map_or(0, |q| q.imported),
            breakers = report.breakers,
            "Engine snapshot restored"
        );
        report
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// In-memory snapshot store (for embedding and testing)
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    schedules: Arc<RwLock<Vec<ScheduleRecord>>>,
    queue: Arc<RwLock<Option<QueueSnapshot>>>,
    breakers: Arc<DashMap<String, CircuitBreakerSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_schedules(&self, records: &[ScheduleRecord]) -> Result<()> {
        *self.schedules.write() = records.to_vec();
        debug!(count = records.len(), "Schedules saved");
        Ok(())
    }

    async fn load_schedules(&self) -> Result<Vec<ScheduleRecord>> {
        Ok(self.schedules.read().clone())
    }

    async fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()> {
        *self.queue.write() = Some(snapshot.clone());
        debug!(items = snapshot.items.len(), "Queue snapshot saved");
        Ok(())
    }

    async fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        Ok(self.queue.read().clone())
    }

    async fn save_breakers(&self, snapshots: &[CircuitBreakerSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            self.breakers.insert(snapshot.key.clone(), snapshot.clone());
        }
        debug!(count = snapshots.len(), "Breaker snapshots saved");
        Ok(())
    }

    async fn load_breakers(&self) -> Result<Vec<CircuitBreakerSnapshot>> {
        let mut snapshots: Vec<CircuitBreakerSnapshot> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(snapshots)
    }
}
