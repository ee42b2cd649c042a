use thiserror::Error;

/// Main error type for the autovram system
#[derive(Error, Debug)]
pub enum AvError {
    #[error("Candidate source error: {0}")]
    CandidateSource(#[from] CandidateSourceError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while resolving or constructing a candidate source.
///
/// These are fatal at session start and always carry enough text for the user
/// to fix the problem.
#[derive(Error, Debug)]
pub enum CandidateSourceError {
    #[error("Unknown engine '{name}'. Available: {available}")]
    Unknown { name: String, available: String },

    #[error("Engine '{source_name}' needs an optional dependency that is not installed. {remediation}")]
    MissingDependency {
        source_name: String,
        remediation: String,
    },

    #[error("Engine '{source_name}' produced no candidate configs")]
    NoCandidates { source_name: String },
}

/// Config export/import errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unknown export format: {format}. Use: json|yaml|dotenv")]
    UnknownFormat { format: String },

    #[error("No config found at {path}. Run `autovram tune ...` first.")]
    NotFound { path: String },

    #[error("Failed to encode config as {format}: {message}")]
    Encode { format: String, message: String },
}

/// Result type alias for autovram operations
pub type AvResult<T> = Result<T, AvError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::AvError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AvError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AvError::Config(format!($($arg)*))
    };
}
