//! Errors returned by the work services.

use tasktree_core::{ParseError, TaskId};
use tasktree_storage::StorageError;

/// Result type for work service operations.
pub type Result<T> = std::result::Result<T, WorkError>;

/// Errors that can occur in task, project and user operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// The referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. "task"
        kind: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Direct progress mutation on a task that has subtasks
    #[error("task {0} has subtasks; its progress is calculated from them")]
    NotALeaf(TaskId),

    /// Malformed or rejected input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The actor may not perform the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Storage backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkError {
    /// Shorthand for [`WorkError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        WorkError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the caller caused the error (as opposed to the backend).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, WorkError::Storage(_))
    }
}

impl From<ParseError> for WorkError {
    fn from(err: ParseError) -> Self {
        WorkError::InvalidInput(err.to_string())
    }
}
