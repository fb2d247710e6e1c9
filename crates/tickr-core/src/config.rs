use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 8;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Top-level config (tickr.toml + TICKR_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickrConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Poller and execution-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the due-job poller scans the store.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on scripts running at the same time, manual and polled alike.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Execution records kept per job; older ones are pruned. 0 keeps everything.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// How scripts are launched and how their output is captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Interpreter used for `python` jobs.
    #[serde(default = "default_python")]
    pub python: String,
    /// Shell used for `bash` jobs.
    #[serde(default = "default_bash")]
    pub bash: String,
    /// Kill the script after this many seconds. Unset means no watchdog.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Cap captured stdout/stderr (middle-omission). Unset keeps full output.
    #[serde(default)]
    pub max_output_chars: Option<usize>,
    /// Remove ANSI escape sequences from captured output.
    #[serde(default = "bool_true")]
    pub strip_ansi: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            bash: default_bash(),
            timeout_secs: None,
            max_output_chars: None,
            strip_ansi: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_max_concurrent_runs() -> usize {
    DEFAULT_MAX_CONCURRENT_RUNS
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}
fn default_python() -> String {
    "python3".to_string()
}
fn default_bash() -> String {
    "bash".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickr/tickr.db", home)
}

impl TickrConfig {
    /// Load config from a TOML file with TICKR_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.tickr/tickr.toml
    ///
    /// A missing file is not an error; every field has a default. Nested keys
    /// are addressed with a double underscore, e.g. `TICKR_SERVER__PORT=9000`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TickrConfig = Figment::from(Serialized::defaults(TickrConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TICKR_").split("__"))
            .extract()
            .map_err(|e| crate::error::TickrError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.scheduler.poll_interval_ms == 0 {
            return Err(crate::error::TickrError::Config(
                "scheduler.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.max_concurrent_runs == 0 {
            return Err(crate::error::TickrError::Config(
                "scheduler.max_concurrent_runs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickr/tickr.toml", home)
}
