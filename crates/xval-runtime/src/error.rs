//! Error types for xval-runtime

use thiserror::Error;

/// Errors that can occur while driving the container daemon
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Container does not exist (never created, or already removed)
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// A file or directory requested from a container does not exist
    #[error("Path {path} not found in container {container}")]
    PathNotFound { container: String, path: String },

    /// Image reference could not be resolved by the daemon
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Any other daemon-side failure
    #[error("Container daemon request failed: {0}")]
    Daemon(String),

    /// Log streaming failed
    #[error("Log stream failed: {0}")]
    LogStream(String),

    /// Local I/O error (log files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Whether this error means "the thing asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::ContainerNotFound(_)
                | RuntimeError::PathNotFound { .. }
                | RuntimeError::ImageNotFound(_)
        )
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        RuntimeError::Daemon(err.to_string())
    }
}
