use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` and `executions` tables (idempotent). Timestamps are
/// fixed-width RFC 3339 UTC text, so `scheduled_time <= ?` compares
/// chronologically and the due-job poll can use `idx_jobs_due`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            name             TEXT    NOT NULL,
            script_type      TEXT    NOT NULL CHECK (script_type IN ('python', 'bash')),
            code             TEXT    NOT NULL,
            scheduled_time   TEXT    NOT NULL,
            status           TEXT    NOT NULL DEFAULT 'SCHEDULED'
                CHECK (status IN ('SCHEDULED', 'RUNNING', 'ENDED_SUCCESS', 'ENDED_FAILED')),
            recurrence_type  TEXT
                CHECK (recurrence_type IN ('HOURLY', 'DAILY', 'WEEKLY', 'MONTHLY')),
            recurrence_value INTEGER CHECK (recurrence_value >= 1),
            last_run_at      TEXT,               -- start of the latest run, or NULL
            run_count        INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            -- both recurrence columns are set, or neither
            CHECK ((recurrence_type IS NULL) = (recurrence_value IS NULL))
        ) STRICT;

        -- SELECT … WHERE status = 'SCHEDULED' AND scheduled_time <= ?
        CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (status, scheduled_time);

        CREATE TABLE IF NOT EXISTS executions (
            id            TEXT    NOT NULL PRIMARY KEY,
            job_id        TEXT    NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
            run_trigger   TEXT    NOT NULL,
            scheduled_for TEXT    NOT NULL,
            started_at    TEXT    NOT NULL,
            ended_at      TEXT    NOT NULL,
            exit_status   TEXT    NOT NULL CHECK (exit_status IN ('SUCCESS', 'FAILED')),
            exit_code     INTEGER,
            stdout        TEXT    NOT NULL,
            stderr        TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_executions_job
            ON executions (job_id, started_at DESC);
        ",
    )?;
    Ok(())
}
