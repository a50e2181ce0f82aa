//! Error taxonomy shared by the transcoding pipeline.
//!
//! Job-oriented failures ([`Error::Upstream`], [`Error::Transcode`]) are
//! terminal and get persisted on the job record. Session-oriented failures
//! ([`Error::NotReady`], [`Error::NotFound`]) are transient and never stored;
//! the caller is expected to re-poll or restart the session.

use std::fmt;

/// Maximum length of diagnostic text kept on a failed job.
pub const MAX_DIAGNOSTIC_LEN: usize = 2000;

/// Common error type for streamforged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine binary could not be resolved or the configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The remote origin was unreachable or the retry budget was exhausted.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The engine exited unsuccessfully or timed out.
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// An artifact was requested before the engine produced it.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// The requested job, session, or artifact does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "conversion_job", "session").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new Upstream error.
    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a new Transcode error, truncating the diagnostic text.
    pub fn transcode<S: Into<String>>(msg: S) -> Self {
        Self::Transcode(truncate_diagnostic(&msg.into()))
    }

    /// Create a new NotReady error.
    pub fn not_ready<S: Into<String>>(msg: S) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create a new NotFound error.
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Configuration(_) => 500,
            Error::Upstream(_) => 502,
            Error::Transcode(_) => 502,
            Error::NotReady(_) => 503,
            Error::NotFound { .. } => 404,
            Error::InvalidInput(_) => 400,
            Error::Database(_) => 500,
            Error::Io(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether this error ends a job for good and belongs on its record.
    pub fn is_terminal_for_job(&self) -> bool {
        !matches!(self, Error::NotReady(_) | Error::NotFound { .. })
    }
}

/// Truncate diagnostic text (usually engine stderr) to [`MAX_DIAGNOSTIC_LEN`]
/// characters, keeping the tail where the engine reports the actual failure.
pub fn truncate_diagnostic(text: &str) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= MAX_DIAGNOSTIC_LEN {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - MAX_DIAGNOSTIC_LEN).collect();
    format!("...{tail}")
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("session", "abc");
        assert_eq!(err.to_string(), "session not found: abc");

        let err = Error::configuration("ffmpeg not found");
        assert_eq!(err.to_string(), "Configuration error: ffmpeg not found");

        let err = Error::upstream("retry budget exhausted");
        assert_eq!(err.to_string(), "Upstream error: retry budget exhausted");

        let err = Error::not_ready("index.m3u8");
        assert_eq!(err.to_string(), "Not ready: index.m3u8");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(Error::configuration("x").http_status(), 500);
        assert_eq!(Error::upstream("x").http_status(), 502);
        assert_eq!(Error::transcode("x").http_status(), 502);
        assert_eq!(Error::not_ready("x").http_status(), 503);
        assert_eq!(Error::not_found("job", 1).http_status(), 404);
        assert_eq!(Error::invalid_input("x").http_status(), 400);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_terminal_for_job() {
        assert!(Error::upstream("x").is_terminal_for_job());
        assert!(Error::transcode("x").is_terminal_for_job());
        assert!(!Error::not_ready("x").is_terminal_for_job());
        assert!(!Error::not_found("session", "x").is_terminal_for_job());
    }

    #[test]
    fn test_transcode_truncates_long_stderr() {
        let stderr = format!("{}fatal: invalid data", "x".repeat(5000));
        let err = Error::transcode(stderr);
        let Error::Transcode(msg) = err else {
            panic!("expected transcode error");
        };
        assert!(msg.starts_with("..."));
        assert!(msg.ends_with("fatal: invalid data"));
        assert_eq!(msg.chars().count(), MAX_DIAGNOSTIC_LEN + 3);
    }

    #[test]
    fn test_short_diagnostic_untouched() {
        assert_eq!(truncate_diagnostic("  exit 1\n"), "exit 1");
    }
}
