//! Error types for the render pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering a dashboard
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request fields
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The target did not answer the reachability probe with a success status
    #[error("Unable to access URL: {0}")]
    UnreachableTarget(String),

    /// The target answered, but not with an HTML page
    #[error("The URL provided is not a valid dashboard page: {0}")]
    InvalidTarget(String),

    /// Navigation did not finish within the navigation timeout
    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    /// Anything that went wrong while driving the browser
    #[error("Rendering failed: {0}")]
    RenderFailure(String),

    /// The worker process crashed or exited without reporting
    #[error("PDF generation process failed: {0}")]
    ProcessFailure(String),

    /// The orchestrator ceiling elapsed
    #[error("PDF generation timed out after {0}s")]
    RequestTimeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Wire tag for the failure kinds a worker can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    UnreachableTarget,
    InvalidTarget,
    NavigationTimeout,
    RenderFailure,
}

impl Error {
    /// Kind reported across the worker boundary. Orchestrator-side errors
    /// never cross it and collapse to `RenderFailure`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::UnreachableTarget(_) => ErrorKind::UnreachableTarget,
            Error::InvalidTarget(_) => ErrorKind::InvalidTarget,
            Error::NavigationTimeout(_) => ErrorKind::NavigationTimeout,
            _ => ErrorKind::RenderFailure,
        }
    }

    /// Rebuild an error from a worker report. The message is kept verbatim.
    pub fn from_report(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::InvalidRequest => Error::InvalidRequest(message),
            ErrorKind::UnreachableTarget => Error::UnreachableTarget(message),
            ErrorKind::InvalidTarget => Error::InvalidTarget(message),
            ErrorKind::NavigationTimeout => Error::NavigationTimeout(message),
            ErrorKind::RenderFailure => Error::RenderFailure(message),
        }
    }

    /// The bare message without the variant prefix
    pub fn message(&self) -> String {
        match self {
            Error::InvalidRequest(m)
            | Error::UnreachableTarget(m)
            | Error::InvalidTarget(m)
            | Error::NavigationTimeout(m)
            | Error::RenderFailure(m)
            | Error::ProcessFailure(m)
            | Error::ConfigError(m) => m.clone(),
            Error::RequestTimeout(_) => "PDF generation timeout".to_string(),
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::RenderFailure(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::RenderFailure(err.to_string())
    }
}
