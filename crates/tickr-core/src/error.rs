use thiserror::Error;

#[derive(Debug, Error)]
pub enum TickrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TickrError {
    /// Short error code string for logs and startup diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            TickrError::Config(_) => "CONFIG_ERROR",
            TickrError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TickrError>;
