//! Error types for the storage array client
//!
//! Every fallible call returns [`Error`] inline. Each error can also be
//! flattened into an [`ErrorRecord`], the diagnostic detail a session keeps
//! for its most recent call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unified error type for the client
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Connection Errors
    // =========================================================================
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Operation {operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: String, id: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    Backend {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("Insufficient capacity: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    // =========================================================================
    // Job Errors
    // =========================================================================
    #[error("Job {job_id} has already been released")]
    FreedHandle { job_id: String },

    #[error("Job {job_id} failed: {record}")]
    JobFailed { job_id: String, record: ErrorRecord },

    #[error("Job {job_id} still running after {waited_ms} ms of waiting")]
    JobWaitExceeded { job_id: String, waited_ms: u64 },

    /// A poll or release failed while waiting; the job itself is untouched
    #[error("Waiting on job {job_id} interrupted: {source}")]
    JobInterrupted { job_id: String, source: Box<Error> },

    // =========================================================================
    // Configuration / Parse Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification, one per status code family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Auth,
    InvalidUri,
    Timeout,
    NotFound,
    InvalidArgument,
    Transport,
    Backend,
    FreedHandle,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::InvalidUri => write!(f, "invalid_uri"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Backend => write!(f, "backend"),
            ErrorKind::FreedHandle => write!(f, "freed_handle"),
        }
    }
}

/// Status family of a call: success, deferred, or an error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    JobStarted,
    Err(ErrorKind),
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Ok => write!(f, "OK"),
            StatusCode::JobStarted => write!(f, "JOB_STARTED"),
            StatusCode::Err(kind) => write!(f, "ERR_{}", kind.to_string().to_uppercase()),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::JobInterrupted { source, .. } => source.kind(),
            Error::Connection(_) | Error::SessionClosed => ErrorKind::Connection,
            Error::Authentication(_) => ErrorKind::Auth,
            Error::InvalidUri { .. } | Error::UrlParse(_) => ErrorKind::InvalidUri,
            Error::Timeout { .. } | Error::JobWaitExceeded { .. } => ErrorKind::Timeout,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::InvalidArgument(_)
            | Error::AlreadyExists { .. }
            | Error::Configuration(_) => ErrorKind::InvalidArgument,
            Error::Transport(_) | Error::Io(_) => ErrorKind::Transport,
            Error::Backend { .. }
            | Error::InsufficientCapacity { .. }
            | Error::JobFailed { .. }
            | Error::Json(_)
            | Error::Yaml(_) => ErrorKind::Backend,
            Error::FreedHandle { .. } => ErrorKind::FreedHandle,
        }
    }

    /// Status code this error reports
    pub fn status(&self) -> StatusCode {
        StatusCode::Err(self.kind())
    }

    /// Check if the same call may succeed when retried on the same session
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::JobInterrupted { source, .. } => source.is_retryable(),
            _ => matches!(
                self,
                Error::Timeout { .. } | Error::Transport(_) | Error::JobWaitExceeded { .. }
            ),
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::JobInterrupted { source, .. } => source.is_transient(),
            _ => matches!(self, Error::Timeout { .. } | Error::Transport(_)),
        }
    }

    /// Job a waiting error refers to, for resuming or releasing it by id
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Error::FreedHandle { job_id }
            | Error::JobFailed { job_id, .. }
            | Error::JobWaitExceeded { job_id, .. }
            | Error::JobInterrupted { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Check if this error signals caller misuse rather than a runtime condition
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Error::FreedHandle { .. } | Error::SessionClosed)
    }

    /// Flatten this error into a diagnostic record for `operation`
    pub fn record(&self, operation: &str) -> ErrorRecord {
        let exception = match self {
            Error::JobFailed { record, .. } => record.exception.clone(),
            Error::Io(e) => Some(format!("{:?}", e.kind())),
            _ => None,
        };
        let debug = match self {
            Error::JobFailed { record, .. } => record.debug.clone(),
            Error::Backend { backend, .. } => Some(format!("backend={}", backend)),
            _ => None,
        };

        ErrorRecord {
            kind: self.kind(),
            operation: operation.to_string(),
            message: self.to_string(),
            exception,
            debug,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }
}

/// Diagnostic detail correlated with one failing call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// Operation that produced the error
    pub operation: String,
    pub message: String,
    /// Exception-level detail reported by the backend, if any
    pub exception: Option<String>,
    /// Debug detail reported by the backend, if any
    pub debug: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Build a record directly, as backends do for failed jobs
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
            exception: None,
            debug: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// Single-line JSON form, for shipping diagnostics to a log pipeline
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.operation, self.message)?;
        if let Some(exception) = &self.exception {
            write!(f, " - exception {}", exception)?;
        }
        if let Some(debug) = &self.debug {
            write!(f, " - debug {}", debug)?;
        }
        Ok(())
    }
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
