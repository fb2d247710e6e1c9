//! Hands claimed jobs to the executor pool and records how they finished.
//!
//! Both the poller and manual runs go through [`Dispatcher::dispatch`], so
//! they share one claim path and one bounded pool of concurrent runs.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SubsecRound, Utc};
use tickr_executor::ScriptExecutor;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{Result, SchedulerError},
    recurrence::next_after,
    store::JobStore,
    types::{ExecutionRecord, ExitStatus, Job, JobStatus, RunTrigger},
};

/// Attempts at storing a run's outcome while the database is busy.
const SETTLE_ATTEMPTS: u32 = 5;
/// First retry delay; doubles on each attempt.
const SETTLE_BACKOFF: Duration = Duration::from_millis(200);

/// Completion handle for a single run.
pub type RunHandle = JoinHandle<Result<ExecutionRecord>>;

pub struct Dispatcher {
    store: Arc<JobStore>,
    executor: Arc<dyn ScriptExecutor>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<dyn ScriptExecutor>,
        clock: Arc<dyn Clock>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    /// Claim `id` (SCHEDULED → RUNNING) and start its run in the background.
    ///
    /// Returns the job as claimed plus a handle resolving to the stored
    /// record. Fails with `Conflict` if the job is not SCHEDULED, which is
    /// how a lost race with another trigger shows up.
    pub fn dispatch(self: &Arc<Self>, id: &str, trigger: RunTrigger) -> Result<(Job, RunHandle)> {
        let job = self.store.claim(id, self.clock.now())?;
        debug!(job_id = %job.id, trigger = trigger.as_str(), "job claimed");

        let this = Arc::clone(self);
        let claimed = job.clone();
        let handle = tokio::spawn(async move {
            let job_id = claimed.id.clone();
            let result = this.execute(claimed, trigger).await;
            if let Err(e) = &result {
                error!(%job_id, "failed to record run: {e}");
            }
            result
        });
        Ok((job, handle))
    }

    /// Run an already-claimed job and settle it through [`JobStore::complete`].
    ///
    /// A job is RUNNING while it waits here for a pool slot.
    pub async fn execute(&self, job: Job, trigger: RunTrigger) -> Result<ExecutionRecord> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SchedulerError::Internal("executor pool closed".to_string()))?;

        info!(job_id = %job.id, name = %job.name, script = %job.script_type, trigger = trigger.as_str(), "run started");
        let output = self.executor.run(job.script_type, &job.code).await;
        drop(permit);

        let record = ExecutionRecord {
            id: Uuid::now_v7().to_string(),
            job_id: job.id.clone(),
            trigger,
            scheduled_for: job.scheduled_time,
            started_at: output.started_at.trunc_subsecs(6),
            ended_at: output.ended_at.trunc_subsecs(6),
            exit_status: if output.succeeded() {
                ExitStatus::Success
            } else {
                ExitStatus::Failed
            },
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        };

        let outcome = self.settle(&job, &record).await;
        let (record, settled) = match outcome {
            Ok(settled) => (record, settled),
            Err(e @ (SchedulerError::Conflict { .. } | SchedulerError::JobNotFound { .. })) => {
                return Err(e)
            }
            Err(e) => {
                // The job must not stay RUNNING; store a failed record
                // without the captured output.
                error!(job_id = %job.id, "could not record run, marking it failed: {e}");
                let fallback = ExecutionRecord {
                    id: Uuid::now_v7().to_string(),
                    exit_status: ExitStatus::Failed,
                    stdout: String::new(),
                    stderr: format!("[tickr] run finished but its result could not be recorded: {e}"),
                    ..record
                };
                let settled = self.settle(&job, &fallback).await?;
                (fallback, settled)
            }
        };
        info!(
            job_id = %job.id,
            exit = record.exit_status.as_str(),
            exit_code = ?record.exit_code,
            duration_ms = record.duration_ms(),
            status = %settled,
            "run finished"
        );
        Ok(record)
    }

    /// Finish a RUNNING job whose process was lost (e.g. the service stopped
    /// mid-run). Stores a failed record and re-arms recurring jobs.
    pub async fn abandon(&self, job: &Job, reason: &str) -> Result<ExecutionRecord> {
        let now = self.clock.now().trunc_subsecs(6);
        let record = ExecutionRecord {
            id: Uuid::now_v7().to_string(),
            job_id: job.id.clone(),
            trigger: RunTrigger::Scheduled,
            scheduled_for: job.scheduled_time,
            started_at: now,
            ended_at: now,
            exit_status: ExitStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("[tickr] {reason}"),
        };
        let settled = self.settle(job, &record).await?;
        warn!(job_id = %job.id, status = %settled, "{reason}");
        Ok(record)
    }

    /// Store `record` through [`JobStore::complete`], retrying with backoff
    /// while the database is busy.
    async fn settle(&self, job: &Job, record: &ExecutionRecord) -> Result<JobStatus> {
        let mut delay = SETTLE_BACKOFF;
        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            let next = self.next_run(job, now);
            match self.store.complete(record, next, now) {
                Err(e) if e.is_transient() && attempt < SETTLE_ATTEMPTS => {
                    warn!(job_id = %job.id, attempt, "database busy while recording run, retrying in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                settled => return settled,
            }
        }
    }

    /// Next occurrence after the one just served, skipping any already past.
    fn next_run(&self, job: &Job, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let recurrence = job.recurrence?;
        match next_after(job.scheduled_time, recurrence, now) {
            Ok(next) => Some(next.trunc_subsecs(6)),
            Err(e) => {
                error!(job_id = %job.id, "cannot compute next occurrence, job stays ended: {e}");
                None
            }
        }
    }
}
