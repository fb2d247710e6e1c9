//! SQLite-backed job store.
//!
//! Every status change is a single guarded `UPDATE … WHERE status = ?from`,
//! so the store is the one place where concurrent triggers are serialised.
//! The guard holds across independent connections to the same database
//! file, not just across threads sharing this struct.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{
        is_storable, ExecutionRecord, Job, JobPatch, JobStatus, NewJob, Recurrence, ScriptType,
    },
};

const JOB_COLUMNS: &str = "id, name, script_type, code, scheduled_time, status, recurrence_type,
     recurrence_value, last_run_at, run_count, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, job_id, run_trigger, scheduled_for, started_at, ended_at,
     exit_status, exit_code, stdout, stderr";

/// Durable collection of jobs and their execution records.
pub struct JobStore {
    db: Mutex<Connection>,
    /// Records kept per job after each insert; 0 disables pruning.
    history_limit: usize,
}

impl JobStore {
    /// Wrap `conn`, enabling foreign keys and creating the schema if needed.
    pub fn new(conn: Connection, history_limit: usize) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            history_limit,
        })
    }

    /// Fresh in-memory store with the default history limit.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(
            Connection::open_in_memory()?,
            tickr_core::config::DEFAULT_HISTORY_LIMIT,
        )
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| SchedulerError::Internal("job store lock poisoned".to_string()))
    }

    /// Validate `new` and insert it as a SCHEDULED job.
    #[instrument(skip(self, new))]
    pub fn create(&self, new: NewJob, now: DateTime<Utc>) -> Result<Job> {
        let job = validate_new_job(new, now)?;
        let (rec_type, rec_value) = recurrence_columns(job.recurrence);

        self.db()?.execute(
            "INSERT INTO jobs
             (id, name, script_type, code, scheduled_time, status, recurrence_type,
              recurrence_value, last_run_at, run_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'SCHEDULED', ?6, ?7, NULL, 0, ?8, ?8)",
            rusqlite::params![
                job.id,
                job.name,
                job.script_type.to_string(),
                job.code,
                ts(job.scheduled_time),
                rec_type,
                rec_value,
                ts(now),
            ],
        )?;

        info!(job_id = %job.id, name = %job.name, scheduled_time = %job.scheduled_time, "job created");
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Result<Job> {
        let db = self.db()?;
        fetch_job(&db, id)?.ok_or_else(|| not_found(id))
    }

    /// Every job, oldest first.
    pub fn list(&self) -> Result<Vec<Job>> {
        let db = self.db()?;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at, id"
        ))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// SCHEDULED jobs whose `scheduled_time` is at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        self.select_where(
            "status = 'SCHEDULED' AND scheduled_time <= ?1 ORDER BY scheduled_time",
            &ts(now),
        )
    }

    /// Jobs currently in RUNNING.
    pub fn running(&self) -> Result<Vec<Job>> {
        self.select_where("status = ?1", JobStatus::Running.as_str())
    }

    fn select_where(&self, clause: &str, arg: &str) -> Result<Vec<Job>> {
        let db = self.db()?;
        let mut stmt = db.prepare_cached(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE {clause}"))?;
        let jobs = stmt
            .query_map([arg], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Apply an edit to `name` and/or `scheduled_time`. Never touches `status`.
    ///
    /// Moving a finished non-recurring job is a `Conflict`: it will never run
    /// again, so a new time would be meaningless. Renaming is always allowed.
    #[instrument(skip(self, patch), fields(job_id = %id))]
    pub fn update(&self, id: &str, patch: JobPatch, now: DateTime<Utc>) -> Result<Job> {
        let name = match patch.name {
            Some(name) if name.trim().is_empty() => {
                return Err(SchedulerError::Validation("name must not be blank".to_string()))
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };
        if let Some(at) = patch.scheduled_time {
            check_storable(at)?;
        }
        let scheduled_time = patch.scheduled_time.map(|t| ts(t.trunc_subsecs(6)));

        let mut db = self.db()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = fetch_job(&tx, id)?.ok_or_else(|| not_found(id))?;
        if scheduled_time.is_some() && current.status.is_ended() {
            return Err(SchedulerError::conflict(
                id,
                current.status,
                "job has finished and will not run again",
            ));
        }

        tx.execute(
            "UPDATE jobs
             SET name           = COALESCE(?1, name),
                 scheduled_time = COALESCE(?2, scheduled_time),
                 updated_at     = ?3
             WHERE id = ?4",
            rusqlite::params![name, scheduled_time, ts(now), id],
        )?;
        let job = fetch_job(&tx, id)?.ok_or_else(|| not_found(id))?;
        tx.commit()?;

        info!(status = %job.status, "job edited");
        Ok(job)
    }

    /// Delete a job and all of its execution records.
    ///
    /// A RUNNING job cannot be deleted (`Conflict`); its run must finish first.
    #[instrument(skip(self), fields(job_id = %id))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut db = self.db()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
            "DELETE FROM jobs WHERE id = ?1 AND status <> 'RUNNING'",
            [id],
        )?;
        if n == 0 {
            return Err(match current_status(&tx, id)? {
                None => not_found(id),
                Some(status) => SchedulerError::conflict(
                    id,
                    status,
                    "job is running; delete it once the run has finished",
                ),
            });
        }
        tx.execute("DELETE FROM executions WHERE job_id = ?1", [id])?;
        tx.commit()?;

        info!("job deleted");
        Ok(())
    }

    /// Atomically move `id` from `from` to `to`.
    ///
    /// Succeeds iff the job's status equalled `from` at the instant of the
    /// update. Otherwise returns `Conflict` (carrying the status actually
    /// found) or `JobNotFound`. ENDED_* → SCHEDULED is not accepted here:
    /// re-arming needs a new `scheduled_time` and happens inside
    /// [`JobStore::complete`].
    pub fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if to == JobStatus::Scheduled || !from.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition { from, to });
        }

        let db = self.db()?;
        let n = db.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            rusqlite::params![to.as_str(), ts(now), id, from.as_str()],
        )?;
        if n == 1 {
            debug!(job_id = %id, %from, %to, "transition applied");
            return Ok(());
        }

        match current_status(&db, id)? {
            None => Err(not_found(id)),
            Some(status) => Err(SchedulerError::conflict(
                id,
                status,
                format!("expected {from} to move to {to}"),
            )),
        }
    }

    /// SCHEDULED → RUNNING, returning the job exactly as it was claimed.
    ///
    /// This is the only way a run starts. Of any number of concurrent callers
    /// for the same job, at most one gets `Ok`; the rest see `Conflict`.
    pub fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<Job> {
        let mut db = self.db()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let n = tx.execute(
            "UPDATE jobs SET status = 'RUNNING', updated_at = ?1
             WHERE id = ?2 AND status = 'SCHEDULED'",
            rusqlite::params![ts(now), id],
        )?;
        if n == 0 {
            return Err(match current_status(&tx, id)? {
                None => not_found(id),
                Some(status) => SchedulerError::conflict(id, status, "job is not SCHEDULED"),
            });
        }
        let job = fetch_job(&tx, id)?.ok_or_else(|| not_found(id))?;
        tx.commit()?;
        Ok(job)
    }

    /// Record a finished run and settle the job's status in one transaction.
    ///
    /// 1. RUNNING → ENDED_SUCCESS / ENDED_FAILED (from `record.exit_status`)
    /// 2. insert `record` and prune history beyond the configured limit
    /// 3. if `next` is given and the job is recurring, ENDED_* → SCHEDULED
    ///
    /// In step 3 the job moves to `next` only if its `scheduled_time` still
    /// equals `record.scheduled_for`; a time edited during the run wins.
    ///
    /// Returns the status the job was left in.
    #[instrument(skip(self, record), fields(job_id = %record.job_id, exit = ?record.exit_status))]
    pub fn complete(
        &self,
        record: &ExecutionRecord,
        next: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<JobStatus> {
        let id = record.job_id.as_str();
        let ended = record.exit_status.ended_status();
        let now_str = ts(now);

        let mut db = self.db()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let n = tx.execute(
            "UPDATE jobs
             SET status = ?1, last_run_at = ?2, run_count = run_count + 1, updated_at = ?3
             WHERE id = ?4 AND status = 'RUNNING'",
            rusqlite::params![ended.as_str(), ts(record.started_at), now_str, id],
        )?;
        if n == 0 {
            return Err(match current_status(&tx, id)? {
                None => not_found(id),
                Some(status) => {
                    SchedulerError::conflict(id, status, "run finished but job was not RUNNING")
                }
            });
        }

        insert_execution(&tx, record)?;

        let mut settled = ended;
        if let Some(next) = next {
            let rearmed = tx.execute(
                "UPDATE jobs
                 SET status = 'SCHEDULED',
                     scheduled_time = CASE WHEN scheduled_time = ?1 THEN ?2 ELSE scheduled_time END,
                     updated_at = ?3
                 WHERE id = ?4 AND status = ?5 AND recurrence_type IS NOT NULL",
                rusqlite::params![ts(record.scheduled_for), ts(next), now_str, id, ended.as_str()],
            )?;
            if rearmed == 1 {
                settled = JobStatus::Scheduled;
            }
        }

        if self.history_limit > 0 {
            let pruned = tx.execute(
                "DELETE FROM executions
                 WHERE job_id = ?1 AND id NOT IN (
                     SELECT id FROM executions WHERE job_id = ?1
                     ORDER BY started_at DESC, id DESC LIMIT ?2
                 )",
                rusqlite::params![id, self.history_limit as i64],
            )?;
            if pruned > 0 {
                debug!(pruned, "old execution records pruned");
            }
        }

        tx.commit()?;
        Ok(settled)
    }

    /// Most recent execution record, or `None` if the job has not run yet.
    pub fn latest_execution(&self, job_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.executions(job_id, 1)?.into_iter().next())
    }

    /// Up to `limit` execution records for a job, newest first.
    pub fn executions(&self, job_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let db = self.db()?;
        if current_status(&db, job_id)?.is_none() {
            return Err(not_found(job_id));
        }
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2"
        ))?;
        let records = stmt
            .query_map(rusqlite::params![job_id, limit as i64], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

// --- helpers ----------------------------------------------------------------

/// Fixed-width UTC text form used for every stored instant.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn not_found(id: &str) -> SchedulerError {
    SchedulerError::JobNotFound { id: id.to_string() }
}

fn validate_new_job(new: NewJob, now: DateTime<Utc>) -> Result<Job> {
    let name = new
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SchedulerError::Validation("name is required".to_string()))?;
    let scheduled_time = new
        .scheduled_time
        .ok_or_else(|| SchedulerError::Validation("scheduled_time is required".to_string()))?;
    check_storable(scheduled_time)?;
    let code = new
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| SchedulerError::Validation("code is required".to_string()))?;
    if let Some(rec) = new.recurrence {
        if rec.recurrence_value < 1 {
            return Err(SchedulerError::Validation(
                "recurrence_value must be at least 1".to_string(),
            ));
        }
    }

    // Stored instants carry microseconds; truncate up front so the returned
    // job compares equal to what a later read yields.
    let now = now.trunc_subsecs(6);
    Ok(Job {
        id: Uuid::new_v4().to_string(),
        name,
        script_type: new.script_type.unwrap_or(ScriptType::Python),
        code,
        scheduled_time: scheduled_time.trunc_subsecs(6),
        status: JobStatus::Scheduled,
        recurrence: new.recurrence,
        last_run_at: None,
        run_count: 0,
        created_at: now,
        updated_at: now,
    })
}

fn check_storable(at: DateTime<Utc>) -> Result<()> {
    if is_storable(at) {
        Ok(())
    } else {
        Err(SchedulerError::Validation(format!(
            "scheduled_time {at} is outside years 0000-9999"
        )))
    }
}

fn recurrence_columns(recurrence: Option<Recurrence>) -> (Option<&'static str>, Option<u32>) {
    match recurrence {
        Some(r) => (Some(r.recurrence_type.as_str()), Some(r.recurrence_value)),
        None => (None, None),
    }
}

fn fetch_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

fn current_status(conn: &Connection, id: &str) -> Result<Option<JobStatus>> {
    let raw: Option<String> = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    raw.map(|s| s.parse().map_err(SchedulerError::Internal))
        .transpose()
}

fn insert_execution(conn: &Connection, record: &ExecutionRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO executions
         (id, job_id, run_trigger, scheduled_for, started_at, ended_at,
          exit_status, exit_code, stdout, stderr)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            record.id,
            record.job_id,
            record.trigger.as_str(),
            ts(record.scheduled_for),
            ts(record.started_at),
            ts(record.ended_at),
            record.exit_status.as_str(),
            record.exit_code,
            record.stdout,
            record.stderr,
        ],
    )?;
    Ok(())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Map a SQLite row (selected with `JOB_COLUMNS`) to a `Job`.
fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let recurrence = match row.get::<_, Option<u32>>(7)? {
        Some(value) => Some(Recurrence::new(parse_text(row, 6)?, value)),
        None => None,
    };
    let last_run_at = match row.get::<_, Option<String>>(8)? {
        Some(raw) => Some(parse_ts(8, &raw)?),
        None => None,
    };

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        script_type: parse_text(row, 2)?,
        code: row.get(3)?,
        scheduled_time: parse_ts(4, &row.get::<_, String>(4)?)?,
        status: parse_text(row, 5)?,
        recurrence,
        last_run_at,
        run_count: row.get(9)?,
        created_at: parse_ts(10, &row.get::<_, String>(10)?)?,
        updated_at: parse_ts(11, &row.get::<_, String>(11)?)?,
    })
}

/// Map a SQLite row (selected with `EXECUTION_COLUMNS`) to an `ExecutionRecord`.
fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        trigger: parse_text(row, 2)?,
        scheduled_for: parse_ts(3, &row.get::<_, String>(3)?)?,
        started_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        ended_at: parse_ts(5, &row.get::<_, String>(5)?)?,
        exit_status: parse_text(row, 6)?,
        exit_code: row.get(7)?,
        stdout: row.get(8)?,
        stderr: row.get(9)?,
    })
}
