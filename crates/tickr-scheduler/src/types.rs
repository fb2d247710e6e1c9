use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

pub use tickr_executor::ScriptType;

/// Whether `at` falls in years 0000..=9999.
///
/// Instants are stored as RFC 3339 text and compared as strings, which only
/// orders correctly with a four-digit year.
pub fn is_storable(at: DateTime<Utc>) -> bool {
    (0..=9999).contains(&at.year())
}

/// Lifecycle state of a job. These four values are the only ones ever stored.
///
/// ```text
/// SCHEDULED ──▶ RUNNING ──▶ ENDED_SUCCESS ─┐
///     ▲                └──▶ ENDED_FAILED ──┤ (recurring only)
///     └────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for `scheduled_time`.
    Scheduled,
    /// Claimed by the poller or a manual run; the script is queued or executing.
    Running,
    /// Last run exited with code 0.
    EndedSuccess,
    /// Last run exited non-zero, crashed, or could not be launched.
    EndedFailed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::EndedSuccess => "ENDED_SUCCESS",
            JobStatus::EndedFailed => "ENDED_FAILED",
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, JobStatus::EndedSuccess | JobStatus::EndedFailed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    ///
    /// ENDED_* → SCHEDULED is only legal for recurring jobs; the store
    /// enforces that part because it needs the job row.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Scheduled, JobStatus::Running)
                | (JobStatus::Running, JobStatus::EndedSuccess)
                | (JobStatus::Running, JobStatus::EndedFailed)
                | (JobStatus::EndedSuccess, JobStatus::Scheduled)
                | (JobStatus::EndedFailed, JobStatus::Scheduled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "RUNNING" => Ok(JobStatus::Running),
            "ENDED_SUCCESS" => Ok(JobStatus::EndedSuccess),
            "ENDED_FAILED" => Ok(JobStatus::EndedFailed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Calendar unit a recurring job advances by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecurrenceType {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceType::Hourly => "HOURLY",
            RecurrenceType::Daily => "DAILY",
            RecurrenceType::Weekly => "WEEKLY",
            RecurrenceType::Monthly => "MONTHLY",
        }
    }
}

impl std::fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecurrenceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HOURLY" => Ok(RecurrenceType::Hourly),
            "DAILY" => Ok(RecurrenceType::Daily),
            "WEEKLY" => Ok(RecurrenceType::Weekly),
            "MONTHLY" => Ok(RecurrenceType::Monthly),
            other => Err(format!("unknown recurrence type: {other}")),
        }
    }
}

/// "Every `recurrence_value` `recurrence_type`s", e.g. every 2 DAILY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub recurrence_type: RecurrenceType,
    pub recurrence_value: u32,
}

impl Recurrence {
    pub fn new(recurrence_type: RecurrenceType, recurrence_value: u32) -> Self {
        Self {
            recurrence_type,
            recurrence_value,
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string, primary key.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    pub script_type: ScriptType,
    /// Script body. Fixed at creation.
    pub code: String,
    /// Next instant the job is due.
    pub scheduled_time: DateTime<Utc>,
    pub status: JobStatus,
    /// `Some` iff the job is recurring. Fixed at creation.
    pub recurrence: Option<Recurrence>,
    /// Start of the most recent completed run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Number of completed runs.
    pub run_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// Input to job creation.
///
/// Required fields are optional here so a missing value surfaces as a
/// `Validation` error rather than a deserialisation failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub name: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub code: Option<String>,
    pub script_type: Option<ScriptType>,
    pub recurrence: Option<Recurrence>,
}

/// Editable subset of a job. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    pub name: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.scheduled_time.is_none()
    }
}

/// Outcome classification of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitStatus {
    Success,
    Failed,
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Success => "SUCCESS",
            ExitStatus::Failed => "FAILED",
        }
    }

    /// The job status a run with this outcome ends in.
    pub fn ended_status(&self) -> JobStatus {
        match self {
            ExitStatus::Success => JobStatus::EndedSuccess,
            ExitStatus::Failed => JobStatus::EndedFailed,
        }
    }
}

impl std::str::FromStr for ExitStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ExitStatus::Success),
            "FAILED" => Ok(ExitStatus::Failed),
            other => Err(format!("unknown exit status: {other}")),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunTrigger {
    /// The poller found the job due.
    Scheduled,
    /// A caller asked for an immediate run.
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "SCHEDULED",
            RunTrigger::Manual => "MANUAL",
        }
    }
}

impl std::str::FromStr for RunTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(RunTrigger::Scheduled),
            "MANUAL" => Ok(RunTrigger::Manual),
            other => Err(format!("unknown run trigger: {other}")),
        }
    }
}

/// Result of one run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUID v7 string, so ids sort by creation time.
    pub id: String,
    pub job_id: String,
    pub trigger: RunTrigger,
    /// The occurrence this run served (the job's `scheduled_time` when claimed).
    pub scheduled_for: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub exit_status: ExitStatus,
    /// `None` when the process never started or died without an exit code.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_canonical_strings() {
        for status in [
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::EndedSuccess,
            JobStatus::EndedFailed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn display_synonyms_are_not_statuses() {
        for synonym in ["pending", "in_progress", "completed", "success", "ended"] {
            assert!(synonym.parse::<JobStatus>().is_err(), "{synonym} parsed");
        }
    }

    #[test]
    fn state_machine_edges() {
        use JobStatus::*;
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(EndedSuccess));
        assert!(Running.can_transition_to(EndedFailed));
        assert!(EndedFailed.can_transition_to(Scheduled));

        assert!(!Scheduled.can_transition_to(EndedSuccess));
        assert!(!Running.can_transition_to(Scheduled));
        assert!(!Running.can_transition_to(Running));
        assert!(!EndedSuccess.can_transition_to(Running));
        assert!(!EndedSuccess.can_transition_to(EndedFailed));
    }

    #[test]
    fn recurrence_type_parses_any_case() {
        assert_eq!("daily".parse::<RecurrenceType>().unwrap(), RecurrenceType::Daily);
        assert_eq!("MONTHLY".parse::<RecurrenceType>().unwrap(), RecurrenceType::Monthly);
        assert!("NONE".parse::<RecurrenceType>().is_err());
    }

    #[test]
    fn exit_status_maps_to_ended_state() {
        assert_eq!(ExitStatus::Success.ended_status(), JobStatus::EndedSuccess);
        assert_eq!(ExitStatus::Failed.ended_status(), JobStatus::EndedFailed);
    }
}
