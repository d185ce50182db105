//! Error types for the media stream core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the component that raises them (remote client,
//! download coordination, streaming proxy, cache maintenance).
//!
//! `StreamError` is `Clone`: a single download job result is handed to every
//! caller attached to that job, so foreign error types (I/O, JSON) are folded
//! into string-carrying variants by the `From` impls at the bottom of the file.

use crate::client::FileId;
use thiserror::Error;

/// Result type alias using our StreamError type
pub type Result<T> = std::result::Result<T, StreamError>;

/// Main error type for the media stream core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    // ===== Remote Client Errors =====

    /// Bounded wait exceeded (download, session, file appearance, stream stall)
    #[error("{operation} timed out after {seconds} seconds")]
    Timeout {
        /// What was being waited for (e.g. "synchronous download")
        operation: String,
        seconds: u64,
    },

    /// Failure reported by the remote client, message propagated verbatim
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// Remote marks the file as ineligible for download
    #[error("File {0} cannot be downloaded")]
    NotDownloadable(FileId),

    /// No transport session (client closed or never connected)
    #[error("Remote client unavailable")]
    ClientUnavailable,

    /// Remote session did not become ready within the wait
    #[error("Remote session not ready after {seconds} seconds")]
    SessionNotReady { seconds: u64 },

    // ===== Streaming Errors =====

    /// HTTP client closed the connection mid-stream. Not a real failure.
    #[error("Client disconnected")]
    Disconnected,

    /// Range header cannot be satisfied for the known file size
    #[error("Requested range not satisfiable")]
    InvalidRange,

    // ===== File/Storage Errors =====

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Generic file I/O error
    #[error("File I/O error: {0}")]
    FileIoError(String),

    // ===== Input/State Errors =====

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid data format or content
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Component state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ===== General Errors =====

    /// Operation was cancelled by its own execution context
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        if is_disconnect_kind(err.kind()) {
            StreamError::Disconnected
        } else if err.kind() == std::io::ErrorKind::NotFound {
            StreamError::FileNotFound(err.to_string())
        } else {
            StreamError::FileIoError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::InvalidData(format!("JSON error: {}", err))
    }
}

impl From<std::num::ParseIntError> for StreamError {
    fn from(err: std::num::ParseIntError) -> Self {
        StreamError::InvalidInput(format!("Failed to parse integer: {}", err))
    }
}

/// I/O error kinds that mean the peer went away (broken pipe, reset, write timeout)
pub fn is_disconnect_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WriteZero
    )
}

// Helper methods for creating common errors
impl StreamError {
    /// Create a Timeout error for a named operation
    pub fn timeout<S: Into<String>>(operation: S, after: std::time::Duration) -> Self {
        StreamError::Timeout {
            operation: operation.into(),
            seconds: after.as_secs(),
        }
    }

    /// Create a RemoteError with a message
    pub fn remote<S: Into<String>>(message: S) -> Self {
        StreamError::RemoteError(message.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        StreamError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        StreamError::InternalError(message.into())
    }

    /// Check if error is transient (a later attempt may succeed)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::Timeout { .. }
                | StreamError::SessionNotReady { .. }
                | StreamError::ClientUnavailable
                | StreamError::RemoteError(_)
        )
    }

    /// Check if error only means the HTTP peer went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, StreamError::Disconnected)
    }

    /// Check if the failure may come from a stale file reference.
    ///
    /// File ids are not stable across remote sessions; after long idle periods
    /// the remote answers with an error or flags the file as not downloadable.
    pub fn is_stale_reference(&self) -> bool {
        matches!(
            self,
            StreamError::RemoteError(_) | StreamError::NotDownloadable(_)
        )
    }

    /// HTTP status used by the streaming proxy when this error ends a request
    pub fn status_code(&self) -> u16 {
        match self {
            StreamError::InvalidInput(_) => 400,
            StreamError::InvalidRange => 416,
            StreamError::ClientUnavailable | StreamError::SessionNotReady { .. } => 503,
            _ => 500,
        }
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Timeout { .. } => {
                "The track is taking too long to download. Please try again.".to_string()
            }
            StreamError::NotDownloadable(_) => {
                "This track is no longer available for download.".to_string()
            }
            StreamError::ClientUnavailable | StreamError::SessionNotReady { .. } => {
                "Not connected. Please check your connection and try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
