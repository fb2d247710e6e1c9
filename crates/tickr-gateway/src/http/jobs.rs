//! Job routes: a thin JSON framing of [`tickr_scheduler::JobService`].
//!
//! Bodies are parsed leniently (every field optional, types as strings) so
//! that a missing or unknown value becomes a 400 with the same error body
//! as every other failure, not an extractor rejection.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tickr_scheduler::{
    ExecutionRecord, Job, JobPatch, JobStatus, NewJob, Recurrence, RecurrenceType, ScriptType,
};

use super::error::{ApiError, ApiResult};
use crate::app::AppState;

const DEFAULT_HISTORY_PAGE: usize = 20;

// ── Request bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RecurrenceBody {
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_type: Option<String>,
    pub recurrence_value: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: Option<String>,
    pub scheduled_time: Option<String>,
    pub code: Option<String>,
    pub script_type: Option<String>,
    pub recurrence: Option<RecurrenceBody>,
}

/// Only `name` and `scheduled_time` are editable; other fields are ignored.
#[derive(Debug, Deserialize)]
pub struct EditJobRequest {
    pub name: Option<String>,
    pub scheduled_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl CreateJobRequest {
    fn into_new_job(self) -> ApiResult<NewJob> {
        let scheduled_time = self.scheduled_time.as_deref().map(parse_timestamp).transpose()?;
        let script_type = self
            .script_type
            .as_deref()
            .map(|s| s.parse::<ScriptType>().map_err(ApiError::bad_request))
            .transpose()?;
        let recurrence = match self.recurrence {
            Some(body) if body.is_recurring => Some(parse_recurrence(body)?),
            _ => None,
        };

        Ok(NewJob {
            name: self.name,
            scheduled_time,
            code: self.code,
            script_type,
            recurrence,
        })
    }
}

fn parse_recurrence(body: RecurrenceBody) -> ApiResult<Recurrence> {
    let recurrence_type: RecurrenceType = body
        .recurrence_type
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("recurrence_type is required for a recurring job"))?
        .parse()
        .map_err(ApiError::bad_request)?;
    let value = body.recurrence_value.unwrap_or(1);
    let recurrence_value = u32::try_from(value)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "recurrence_value must be a positive integer, got {value}"
            ))
        })?;
    Ok(Recurrence::new(recurrence_type, recurrence_value))
}

/// RFC 3339 instant, or a zone-less `YYYY-MM-DDTHH:MM[:SS[.f]]` taken as UTC
/// (what an HTML `datetime-local` input sends).
fn parse_timestamp(raw: &str) -> ApiResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            ApiError::bad_request(format!("scheduled_time is not an RFC 3339 timestamp: {raw}"))
        })
}

// ── Response bodies ─────────────────────────────────────────────────────────

/// Flat job shape; recurrence fields are null for one-off jobs.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: String,
    pub name: String,
    pub script_type: ScriptType,
    pub code: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: JobStatus,
    pub is_recurring: bool,
    pub recurrence_type: Option<RecurrenceType>,
    pub recurrence_value: Option<u32>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            is_recurring: job.is_recurring(),
            recurrence_type: job.recurrence.map(|r| r.recurrence_type),
            recurrence_value: job.recurrence.map(|r| r.recurrence_value),
            id: job.id,
            name: job.name,
            script_type: job.script_type,
            code: job.code,
            scheduled_time: job.scheduled_time,
            status: job.status,
            last_run_at: job.last_run_at,
            run_count: job.run_count,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionView {
    #[serde(flatten)]
    pub record: ExecutionRecord,
    pub duration_ms: i64,
}

impl From<ExecutionRecord> for ExecutionView {
    fn from(record: ExecutionRecord) -> Self {
        Self {
            duration_ms: record.duration_ms(),
            record,
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JobView>>> {
    let jobs = state.jobs.list_jobs()?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

/// POST /jobs: 201 with the new SCHEDULED job.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let job = state.jobs.create_job(req.into_new_job()?)?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    Ok(Json(state.jobs.get_job(&id)?.into()))
}

/// PUT /jobs/{id}: rename and/or reschedule. Status is never touched.
pub async fn edit_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<EditJobRequest>, JsonRejection>,
) -> ApiResult<Json<JobView>> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let patch = JobPatch {
        name: req.name,
        scheduled_time: req.scheduled_time.as_deref().map(parse_timestamp).transpose()?,
    };
    Ok(Json(state.jobs.edit_job(&id, patch)?.into()))
}

/// DELETE /jobs/{id}: removes the job and its execution history.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.jobs.delete_job(&id)?;
    Ok(Json(json!({"ok": true, "id": id})))
}

/// POST /jobs/{id}/run: 202 once the job is claimed; the script runs in
/// the background.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let ticket = state.jobs.run_job(&id)?;
    Ok((StatusCode::ACCEPTED, Json(ticket.job.into())))
}

/// GET /jobs/{id}/logs: latest execution record, `null` if never run.
pub async fn job_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Option<ExecutionView>>> {
    Ok(Json(state.jobs.job_logs(&id)?.map(ExecutionView::from)))
}

/// GET /jobs/{id}/executions?limit=N: newest first.
pub async fn job_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ExecutionView>>> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_PAGE);
    let records = state.jobs.job_executions(&id, limit)?;
    Ok(Json(records.into_iter().map(ExecutionView::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{build_router, AppState};
    use axum::{
        body::Body,
        http::{Method, Request},
        Router,
    };
    use tickr_core::config::TickrConfig;
    use tickr_executor::{ExecOptions, ProcessExecutor};
    use tickr_scheduler::{JobStore, SystemClock};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = TickrConfig::default();
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let executor = Arc::new(ProcessExecutor::new(ExecOptions {
            bash: "sh".into(),
            ..ExecOptions::default()
        }));
        let (jobs, _engine) =
            tickr_scheduler::build(&config.scheduler, store, executor, Arc::new(SystemClock));
        build_router(Arc::new(AppState::new(config, jobs)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn shell_job(name: &str) -> Value {
        json!({
            "name": name,
            "scheduled_time": "2099-01-01T00:00:00Z",
            "code": "echo hi",
            "script_type": "bash",
        })
    }

    async fn create(app: &Router, body: Value) -> Value {
        let (status, job) = send(app, Method::POST, "/jobs", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{job}");
        job
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = test_app();
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn create_returns_scheduled_job() {
        let app = test_app();
        let job = create(
            &app,
            json!({
                "name": "nightly",
                "scheduled_time": "2099-01-01T02:00:00Z",
                "code": "print('x')",
                "recurrence": {"is_recurring": true, "recurrence_type": "daily", "recurrence_value": 2},
            }),
        )
        .await;

        assert_eq!(job["status"], "SCHEDULED");
        assert_eq!(job["script_type"], "python");
        assert_eq!(job["is_recurring"], true);
        assert_eq!(job["recurrence_type"], "DAILY");
        assert_eq!(job["recurrence_value"], 2);
        assert_eq!(job["run_count"], 0);

        let (status, list) = send(&app, Method::GET, "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_recurring_flag_ignores_recurrence_fields() {
        let app = test_app();
        let mut body = shell_job("once");
        body["recurrence"] = json!({"is_recurring": false, "recurrence_type": "NONE", "recurrence_value": 1});
        let job = create(&app, body).await;
        assert_eq!(job["is_recurring"], false);
        assert!(job["recurrence_type"].is_null());
    }

    #[tokio::test]
    async fn invalid_create_bodies_are_400() {
        let app = test_app();
        let mut bad_script = shell_job("x");
        bad_script["script_type"] = json!("ruby");
        let mut bad_recurrence = shell_job("x");
        bad_recurrence["recurrence"] = json!({"is_recurring": true, "recurrence_type": "YEARLY"});
        let mut zero_value = shell_job("x");
        zero_value["recurrence"] =
            json!({"is_recurring": true, "recurrence_type": "HOURLY", "recurrence_value": 0});
        let mut bad_time = shell_job("x");
        bad_time["scheduled_time"] = json!("tomorrow");
        let mut five_digit_year = shell_job("x");
        five_digit_year["scheduled_time"] = json!("+10000-01-01T00:00");

        for body in [
            json!({"scheduled_time": "2099-01-01T00:00:00Z", "code": "true"}),
            json!({"name": "x", "code": "true"}),
            json!({"name": "x", "scheduled_time": "2099-01-01T00:00:00Z"}),
            bad_script,
            bad_recurrence,
            zero_value,
            bad_time,
            five_digit_year,
        ] {
            let (status, err) = send(&app, Method::POST, "/jobs", Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
        }

        let (_, list) = send(&app, Method::GET, "/jobs", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let app = test_app();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zoneless_time_is_taken_as_utc() {
        let app = test_app();
        let mut body = shell_job("local");
        body["scheduled_time"] = json!("2099-05-01T08:30");
        let job = create(&app, body).await;
        assert_eq!(job["scheduled_time"], "2099-05-01T08:30:00Z");
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let app = test_app();
        for (method, uri) in [
            (Method::GET, "/jobs/missing"),
            (Method::DELETE, "/jobs/missing"),
            (Method::POST, "/jobs/missing/run"),
            (Method::GET, "/jobs/missing/logs"),
            (Method::GET, "/jobs/missing/executions"),
        ] {
            let (status, err) = send(&app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(err["error"]["code"], "NOT_FOUND");
        }
    }

    #[tokio::test]
    async fn edit_renames_and_reschedules_without_touching_status() {
        let app = test_app();
        let job = create(&app, shell_job("before")).await;
        let uri = format!("/jobs/{}", job["id"].as_str().unwrap());

        let (status, edited) = send(
            &app,
            Method::PUT,
            &uri,
            Some(json!({"name": "after", "scheduled_time": "2099-02-01T00:00:00Z", "code": "ignored"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["name"], "after");
        assert_eq!(edited["scheduled_time"], "2099-02-01T00:00:00Z");
        assert_eq!(edited["code"], "echo hi");
        assert_eq!(edited["status"], "SCHEDULED");

        let (status, err) = send(&app, Method::PUT, &uri, Some(json!({"name": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn manual_run_is_accepted_once_and_logs_appear() {
        let app = test_app();
        let job = create(&app, shell_job("now")).await;
        let id = job["id"].as_str().unwrap().to_string();

        let (status, logs) = send(&app, Method::GET, &format!("/jobs/{id}/logs"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(logs.is_null());

        let (status, claimed) = send(&app, Method::POST, &format!("/jobs/{id}/run"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(claimed["status"], "RUNNING");

        let (status, err) = send(&app, Method::POST, &format!("/jobs/{id}/run"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "CONFLICT");

        let mut logs = Value::Null;
        for _ in 0..250 {
            let (_, body) = send(&app, Method::GET, &format!("/jobs/{id}/logs"), None).await;
            if !body.is_null() {
                logs = body;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(logs["stdout"], "hi\n");
        assert_eq!(logs["exit_status"], "SUCCESS");
        assert_eq!(logs["trigger"], "MANUAL");
        assert!(logs["duration_ms"].as_i64().unwrap() >= 0);

        let (_, job) = send(&app, Method::GET, &format!("/jobs/{id}"), None).await;
        assert_eq!(job["status"], "ENDED_SUCCESS");

        let (status, history) =
            send(&app, Method::GET, &format!("/jobs/{id}/executions?limit=5"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_job_and_its_logs() {
        let app = test_app();
        let job = create(&app, shell_job("doomed")).await;
        let id = job["id"].as_str().unwrap();

        let (status, body) = send(&app, Method::DELETE, &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (status, _) = send(&app, Method::GET, &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::GET, &format!("/jobs/{id}/logs"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
