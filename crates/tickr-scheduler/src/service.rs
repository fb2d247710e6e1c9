use std::sync::Arc;

use tracing::info;

use crate::{
    clock::Clock,
    dispatch::{Dispatcher, RunHandle},
    error::Result,
    store::JobStore,
    types::{ExecutionRecord, Job, JobPatch, NewJob, RunTrigger},
};

/// A manual run that has been accepted.
pub struct RunTicket {
    /// The job as claimed, already RUNNING.
    pub job: Job,
    /// Resolves once the run is recorded.
    pub completion: RunHandle,
}

/// Command API: every operation an outer surface (HTTP, CLI) can perform.
///
/// Cheap to clone; all clones share the same store and executor pool.
#[derive(Clone)]
pub struct JobService {
    store: Arc<JobStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
}

impl JobService {
    pub fn new(store: Arc<JobStore>, dispatcher: Arc<Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            dispatcher,
            clock,
        }
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        self.store.list()
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.store.get(id)
    }

    pub fn create_job(&self, new: NewJob) -> Result<Job> {
        self.store.create(new, self.clock.now())
    }

    /// Change a job's name and/or scheduled time. An empty patch is a no-op.
    pub fn edit_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        if patch.is_empty() {
            return self.store.get(id);
        }
        self.store.update(id, patch, self.clock.now())
    }

    pub fn delete_job(&self, id: &str) -> Result<()> {
        self.store.delete(id)
    }

    /// Run a SCHEDULED job now, whatever its `scheduled_time`.
    ///
    /// Returns as soon as the job is claimed. A recurring job is re-armed
    /// from the occurrence it was scheduled for, so a manual run consumes
    /// that occurrence.
    pub fn run_job(&self, id: &str) -> Result<RunTicket> {
        let (job, completion) = self.dispatcher.dispatch(id, RunTrigger::Manual)?;
        info!(job_id = %job.id, "manual run accepted");
        Ok(RunTicket { job, completion })
    }

    /// Most recent execution record, `None` if the job has never run.
    pub fn job_logs(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        self.store.latest_execution(id)
    }

    /// Up to `limit` execution records, newest first.
    pub fn job_executions(&self, id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.store.executions(id, limit)
    }
}
