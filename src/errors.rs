//! Typed error hierarchy for taskdeck.
//!
//! - `BoardError`: server-side domain failures, mapped to HTTP statuses by
//!   `board::api::ApiError`
//! - `UndoError`: failures surfaced by the client-side delete/undo controller

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One rejected field of a request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Location of the offending value; empty for the payload itself.
    pub path: Vec<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: if path.is_empty() {
                Vec::new()
            } else {
                vec![path.to_string()]
            },
            message: message.into(),
        }
    }
}

/// Errors from the board API and its data layer.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Project not found")]
    ProjectNotFound,

    #[error("Task not found")]
    TaskNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Unauthorized")]
    Unauthenticated,

    #[error("Validation failed with {} error(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the task delete/undo controller.
#[derive(Debug, Error)]
pub enum UndoError {
    #[error("Task {task_id} is not visible on the board")]
    TaskNotVisible { task_id: i64 },

    #[error("Remote delete of task {task_id} failed: {source}")]
    Remote {
        task_id: i64,
        #[source]
        source: anyhow::Error,
    },
}
