//! `tickr-scheduler`: job scheduling and execution tracking on SQLite.
//!
//! # Overview
//!
//! Jobs live in a SQLite `jobs` table. The [`engine::SchedulerEngine`] polls
//! for jobs whose `scheduled_time` has arrived, claims each one with an
//! atomic SCHEDULED → RUNNING update and hands it to the
//! [`dispatch::Dispatcher`], which runs the script on a bounded pool and
//! records an [`ExecutionRecord`]. Manual runs from the [`JobService`] go
//! through the same claim, so a job never runs twice for one occurrence.
//!
//! # Recurrence
//!
//! | Type      | Step                                               |
//! |-----------|----------------------------------------------------|
//! | `HOURLY`  | N × 60 minutes                                     |
//! | `DAILY`   | N × 24 hours                                       |
//! | `WEEKLY`  | N × 7 days                                         |
//! | `MONTHLY` | N calendar months, day clamped to the month's end  |
//!
//! A recurring job is re-armed from the occurrence it just served, not from
//! when the run finished, so schedules do not drift.

pub mod clock;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod recurrence;
pub mod service;
pub mod store;
pub mod types;

use std::{sync::Arc, time::Duration};

use tickr_core::config::SchedulerConfig;
use tickr_executor::ScriptExecutor;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{Dispatcher, RunHandle};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use service::{JobService, RunTicket};
pub use store::JobStore;
pub use types::{
    ExecutionRecord, ExitStatus, Job, JobPatch, JobStatus, NewJob, Recurrence, RecurrenceType,
    RunTrigger, ScriptType,
};

/// Wire a store, executor and clock into the Command API and its poller.
///
/// Both halves share one executor pool sized by `max_concurrent_runs`.
pub fn build(
    config: &SchedulerConfig,
    store: Arc<JobStore>,
    executor: Arc<dyn ScriptExecutor>,
    clock: Arc<dyn Clock>,
) -> (JobService, SchedulerEngine) {
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        executor,
        Arc::clone(&clock),
        config.max_concurrent_runs,
    ));
    let service = JobService::new(Arc::clone(&store), Arc::clone(&dispatcher), Arc::clone(&clock));
    let engine = SchedulerEngine::new(
        store,
        dispatcher,
        clock,
        Duration::from_millis(config.poll_interval_ms),
    );
    (service, engine)
}
