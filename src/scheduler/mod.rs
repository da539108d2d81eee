//! Schedule registry and timer-driven firing
//!
//! [`TaskScheduler`] owns one-time, recurring, continuous and cron schedules,
//! computes their next run times and publishes `task:execute` when one fires.
//!
//! # Features
//!
//! - **Cron Expression Support**: five-field cron evaluated in a configured timezone
//! - **Schedule Management**: add, update, enable, disable and remove at runtime
//! - **Metrics Integration**: Prometheus metrics for fires and schedule counts
//! - **Persistence**: export and import as plain records with RFC 3339 dates
//!
//! # Example
//!
//! ```no_run
//! use serp_orchestrator::clock::SystemClock;
//! use serp_orchestrator::cron::CronCache;
//! use serp_orchestrator::events::EventBus;
//! use serp_orchestrator::scheduler::{ScheduleSpec, SchedulerConfig, TaskScheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let events = EventBus::default();
//!     let scheduler = TaskScheduler::new(
//!         SchedulerConfig::default(),
//!         SystemClock::shared(),
//!         events.clone(),
//!         CronCache::default(),
//!     )?;
//!
//!     scheduler.add_schedule(ScheduleSpec::cron(
//!         serde_json::json!({"keyword": "rust async"}),
//!         "0 9 * * 1-5",
//!     ))?;
//!     scheduler.start();
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!
//!     scheduler.stop();
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod metrics;
mod schedule;
mod timing;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use core::{ImportFailure, ImportReport, SchedulerStats, TaskScheduler};
pub use error::{SchedulerError, SchedulerResult};
pub use metrics::{init_scheduler_metrics, SCHEDULER_METRICS};
pub use schedule::{Schedule, ScheduleId, ScheduleRecord, ScheduleSpec, ScheduleType, ScheduleUpdate};
pub use timing::{next_run, TimingContext};
