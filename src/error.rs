//! Error handling for Atelier
//!
//! Every variant maps to one class of the editor's error taxonomy: missing
//! files, credential problems, version conflicts, transient transport
//! failures, and local storage failures.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for Atelier operations
pub type Result<T> = std::result::Result<T, EditorError>;

/// Main error type for Atelier operations
#[derive(Error, Debug)]
pub enum EditorError {
    // Remote content errors
    #[error("File not found on editing or production ref: {path}")]
    NotFound { path: String },

    #[error("Unauthorized: the access token is invalid or expired")]
    Unauthorized,

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Version conflict on {path}: the remote file changed since it was last read")]
    Conflict { path: String },

    #[error("Rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend error {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Invalid content for {path}: {reason}")]
    InvalidContent { path: String, reason: String },

    #[error("Version not found: {id}")]
    VersionNotFound { id: String },

    // Editor state errors
    #[error("No page is loaded")]
    NoPageLoaded,

    #[error("Document for page {page} is unavailable")]
    DocumentUnavailable { page: String },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("Offline queue is full ({limit} items)")]
    OfflineQueueFull { limit: usize },

    // Local storage errors
    #[error("Failed to read local store: {path}: {source}")]
    StorageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write local store: {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EditorError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EditorError::NotFound { .. } => "NOT_FOUND",
            EditorError::Unauthorized => "UNAUTHORIZED",
            EditorError::Forbidden { .. } => "FORBIDDEN",
            EditorError::Conflict { .. } => "CONFLICT",
            EditorError::RateLimited { .. } => "RATE_LIMITED",
            EditorError::Network { .. } => "NETWORK_ERROR",
            EditorError::Transport(_) => "TRANSPORT_ERROR",
            EditorError::Backend { .. } => "BACKEND_ERROR",
            EditorError::InvalidContent { .. } => "INVALID_CONTENT",
            EditorError::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            EditorError::NoPageLoaded => "NO_PAGE_LOADED",
            EditorError::DocumentUnavailable { .. } => "DOCUMENT_UNAVAILABLE",
            EditorError::NothingToUndo => "NOTHING_TO_UNDO",
            EditorError::NothingToRedo => "NOTHING_TO_REDO",
            EditorError::OfflineQueueFull { .. } => "OFFLINE_QUEUE_FULL",
            EditorError::StorageRead { .. } => "STORAGE_READ_ERROR",
            EditorError::StorageWrite { .. } => "STORAGE_WRITE_ERROR",
            EditorError::InvalidConfig { .. } => "INVALID_CONFIG",
            EditorError::Json(_) => "SERIALIZATION_ERROR",
            EditorError::Io(_) => "IO_ERROR",
        }
    }

    /// Returns true for failures that may succeed when the same call is
    /// repeated later without user intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            EditorError::Network { .. }
            | EditorError::Transport(_)
            | EditorError::RateLimited { .. } => true,
            EditorError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the user has to re-authenticate before continuing.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            EditorError::Unauthorized | EditorError::Forbidden { .. }
        )
    }

    /// Returns a user-friendly recovery suggestion.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            EditorError::NotFound { .. } => Some("Check the page path and the configured branches."),
            EditorError::Unauthorized => Some("Sign in again with a valid access token."),
            EditorError::Forbidden { .. } => {
                Some("The token needs write access to the repository contents.")
            }
            EditorError::Conflict { .. } => Some(
                "Someone else saved this page. Reload it, then re-apply your changes.",
            ),
            EditorError::Network { .. } | EditorError::Transport(_) => {
                Some("Check your connection and save again.")
            }
            EditorError::NothingToUndo => Some("There are no edits to undo."),
            EditorError::NothingToRedo => Some("There are no undone edits to redo."),
            EditorError::OfflineQueueFull { .. } => {
                Some("Reconnect to sync queued changes before editing more pages.")
            }
            _ => None,
        }
    }
}
