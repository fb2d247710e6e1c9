//! `tickr-core`: configuration and the shared error type for the tickr workspace.

pub mod config;
pub mod error;

pub use config::TickrConfig;
pub use error::{Result, TickrError};

/// Ensure the parent directory for a file path exists.
pub fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
