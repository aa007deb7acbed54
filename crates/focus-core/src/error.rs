//! Error types for focus.

use thiserror::Error;

/// Result type alias using focus's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for focus operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Classification capability failed
    #[error("Classification error: {0}")]
    Classification(String),

    /// Extraction capability failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a job failing with this error should be retried with backoff.
    ///
    /// Capability, network and database failures are transient. Malformed
    /// input and configuration problems will fail the same way on every
    /// attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(_)
            | Error::Classification(_)
            | Error::Extraction(_)
            | Error::Inference(_)
            | Error::Request(_)
            | Error::Io(_)
            | Error::NotFound(_)
            | Error::Job(_)
            | Error::Internal(_) => true,
            Error::Serialization(_) | Error::Config(_) | Error::InvalidInput(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("raw interaction 42".to_string());
        assert_eq!(err.to_string(), "Not found: raw interaction 42");
    }

    #[test]
    fn test_error_display_classification() {
        let err = Error::Classification("model timeout".to_string());
        assert_eq!(err.to_string(), "Classification error: model timeout");
    }

    #[test]
    fn test_error_display_extraction() {
        let err = Error::Extraction("empty response".to_string());
        assert_eq!(err.to_string(), "Extraction error: empty response");
    }

    #[test]
    fn test_error_display_job() {
        let err = Error::Job("lease lost".to_string());
        assert_eq!(err.to_string(), "Job error: lease lost");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing DATABASE_URL".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing DATABASE_URL");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("unknown job kind: frobnicate".to_string());
        assert_eq!(err.to_string(), "Invalid input: unknown job kind: frobnicate");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => {
                assert!(!msg.is_empty());
            }
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_capability_errors_are_transient() {
        assert!(Error::Classification("x".into()).is_transient());
        assert!(Error::Extraction("x".into()).is_transient());
        assert!(Error::Request("x".into()).is_transient());
    }

    #[test]
    fn test_input_errors_are_permanent() {
        assert!(!Error::InvalidInput("x".into()).is_transient());
        assert!(!Error::Serialization("x".into()).is_transient());
        assert!(!Error::Config("x".into()).is_transient());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
