//! Shared data types for tickr-executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tickr_core::config::ExecutorConfig;

// ---------------------------------------------------------------------------
// ScriptType
// ---------------------------------------------------------------------------

/// Interpreter family a job's script body is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Python,
    Bash,
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScriptType::Python => "python",
            ScriptType::Bash => "bash",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScriptType {
    type Err = String;

    /// Case-insensitive, so `"Python"` and `"BASH"` from older clients parse.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" => Ok(ScriptType::Python),
            "bash" => Ok(ScriptType::Bash),
            other => Err(format!("unknown script type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptOutput
// ---------------------------------------------------------------------------

/// Everything captured from one script run.
///
/// Launch failures, signals and watchdog kills are folded into this struct
/// (with `exit_code == None` and a diagnostic line in `stderr`) so callers
/// always get a record to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOutput {
    /// Process exit code; `None` when the process never started, was killed
    /// by a signal, or was stopped by the watchdog.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ScriptOutput {
    /// A run succeeded iff the process exited normally with code 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Wall-clock run time in milliseconds (never negative).
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0)
    }
}

// ---------------------------------------------------------------------------
// ExecOptions
// ---------------------------------------------------------------------------

/// Knobs for [`crate::runner::ProcessExecutor`].
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Program used for `python` jobs (invoked as `<python> -c <code>`).
    pub python: String,
    /// Program used for `bash` jobs (invoked as `<bash> -c <code>`).
    pub bash: String,
    /// Kill the child after this long. `None` lets scripts run to completion.
    pub timeout: Option<Duration>,
    /// Middle-omission cap per stream. `None` keeps the full capture.
    pub max_output_chars: Option<usize>,
    pub strip_ansi: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

impl From<&ExecutorConfig> for ExecOptions {
    fn from(cfg: &ExecutorConfig) -> Self {
        Self {
            python: cfg.python.clone(),
            bash: cfg.bash.clone(),
            timeout: cfg.timeout_secs.map(Duration::from_secs),
            max_output_chars: cfg.max_output_chars,
            strip_ansi: cfg.strip_ansi,
        }
    }
}

impl ExecOptions {
    /// Interpreter program for `script_type`.
    pub fn program_for(&self, script_type: ScriptType) -> &str {
        match script_type {
            ScriptType::Python => &self.python,
            ScriptType::Bash => &self.bash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_type_parses_case_insensitively() {
        assert_eq!("Python".parse::<ScriptType>().unwrap(), ScriptType::Python);
        assert_eq!("BASH".parse::<ScriptType>().unwrap(), ScriptType::Bash);
        assert!("ruby".parse::<ScriptType>().is_err());
    }

    #[test]
    fn script_type_serializes_lowercase() {
        let json = serde_json::to_string(&ScriptType::Bash).unwrap();
        assert_eq!(json, r#""bash""#);
    }

    #[test]
    fn options_pick_program_per_type() {
        let opts = ExecOptions {
            python: "/opt/py/bin/python".into(),
            ..ExecOptions::default()
        };
        assert_eq!(opts.program_for(ScriptType::Python), "/opt/py/bin/python");
        assert_eq!(opts.program_for(ScriptType::Bash), "bash");
    }

    #[test]
    fn only_exit_zero_counts_as_success() {
        let now = Utc::now();
        let mut out = ScriptOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            started_at: now,
            ended_at: now + chrono::Duration::milliseconds(1500),
        };
        assert!(out.succeeded());
        assert_eq!(out.duration_ms(), 1500);

        out.exit_code = Some(1);
        assert!(!out.succeeded());
        out.exit_code = None;
        assert!(!out.succeeded());
    }
}
