//! Error kinds surfaced by the tracker and its collaborators.
//!
//! Tick-level failures (`CaptureError`, `ProviderError`) are absorbed by the
//! capture loop. Lifecycle failures travel up unchanged as [`TrackerError`].

use thiserror::Error;

/// Failure of the screen-capture collaborator.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("screen capture failed: {0}")]
    Backend(String),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

/// Failure of the analysis / text-generation collaborator.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network, authentication or upstream failure.
    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    /// The provider answered, but the answer does not match the expected shape.
    #[error("malformed model response: {0}")]
    Format(String),
}

impl ProviderError {
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

/// Errors returned by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database stayed busy/locked for the whole retry budget.
    #[error("database busy after {attempts} attempts: {message}")]
    Contention { attempts: u32, message: String },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The row exists but is in a state that forbids the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StorageError {
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }
}

/// Error surfaced to the boundary layer (HTTP handler, CLI, embedding host).
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("capture failed {failures} times in a row, last error: {last}")]
    CaptureFailureStreak { failures: u32, last: CaptureError },

    #[error("summarization failed for session {session_id}: {source}")]
    Summary {
        session_id: i64,
        #[source]
        source: Box<TrackerError>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("context {0} not found")]
    ContextNotFound(String),

    #[error("session {0} not found")]
    SessionNotFound(i64),

    #[error("invalid session transition: {0}")]
    InvalidTransition(String),
}

impl TrackerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
