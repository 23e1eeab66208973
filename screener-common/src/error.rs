//! Error types shared across the screener workspace.

use thiserror::Error;

/// Result type alias using the screener error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for configuration and process-level failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (dataset, universe, command-line argument)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this is a configuration error, looking through context layers.
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::WithContext { source, .. } => source.is_config(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,
            Self::InvalidInput(_) => 65,
            Self::Io(_) => 74,
            Self::Timeout => 75,
            Self::WithContext { .. } | Self::Json(_) => 1,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
