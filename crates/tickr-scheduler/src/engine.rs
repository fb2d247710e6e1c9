use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{
    clock::Clock,
    dispatch::{Dispatcher, RunHandle},
    error::{Result, SchedulerError},
    store::JobStore,
    types::RunTrigger,
};

/// The poller: finds due jobs and hands them to the [`Dispatcher`].
///
/// Runs at most one `tick` at a time and never waits for scripts, so a slow
/// job cannot delay the next poll.
pub struct SchedulerEngine {
    store: Arc<JobStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<JobStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            poll_interval,
        }
    }

    /// Main loop. Polls every `poll_interval` until `shutdown` broadcasts `true`.
    ///
    /// Runs already in flight are not awaited on shutdown; they are settled
    /// by [`SchedulerEngine::recover_interrupted`] on the next start, which
    /// the caller runs before this loop and before accepting manual runs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "scheduler engine started");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll: claim and start every job due at the clock's current time.
    ///
    /// A job claimed elsewhere between the query and the claim (a manual run,
    /// another poller on the same database) is skipped quietly.
    pub fn tick(&self) -> Result<Vec<RunHandle>> {
        let due = self.store.due(self.clock.now())?;
        let mut started = Vec::with_capacity(due.len());

        for job in due {
            match self.dispatcher.dispatch(&job.id, RunTrigger::Scheduled) {
                Ok((_, handle)) => started.push(handle),
                Err(SchedulerError::Conflict { status, .. }) => {
                    debug!(job_id = %job.id, %status, "due job already claimed, skipping");
                }
                Err(SchedulerError::JobNotFound { .. }) => {
                    debug!(job_id = %job.id, "due job deleted before claim, skipping");
                }
                Err(e) => error!(job_id = %job.id, "failed to dispatch due job: {e}"),
            }
        }
        Ok(started)
    }

    /// Settle jobs left RUNNING by a previous process as ENDED_FAILED,
    /// re-arming the recurring ones. Returns how many were recovered.
    ///
    /// Only safe while no other engine is executing jobs from the same
    /// database.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let stranded = self.store.running()?;
        let mut recovered = 0;
        for job in &stranded {
            match self.dispatcher.abandon(job, "run interrupted by scheduler restart").await {
                Ok(_) => recovered += 1,
                Err(e) => error!(job_id = %job.id, "could not recover interrupted job: {e}"),
            }
        }
        if recovered > 0 {
            info!(count = recovered, "interrupted runs recovered");
        }
        Ok(recovered)
    }
}
