//! tickr-executor: runs job scripts in child interpreter processes.
//!
//! `python` bodies run as `<python> -c <code>`, `bash` bodies as
//! `<bash> -c <code>`. Output is captured in full unless a cap is configured,
//! and an optional watchdog can kill runaway scripts.
//!
//! ```rust,no_run
//! use tickr_executor::{ProcessExecutor, ScriptExecutor, ScriptType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = ProcessExecutor::default();
//!     let out = executor.run(ScriptType::Bash, "echo hello").await;
//!     assert!(out.succeeded());
//!     println!("{}", out.stdout);
//! }
//! ```

pub mod error;
pub mod runner;
pub mod truncate;
pub mod types;

pub use error::{ExecError, Result};
pub use runner::{ProcessExecutor, ScriptExecutor};
pub use types::{ExecOptions, ScriptOutput, ScriptType};
