//! Error types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use compactor_codec::{DecodeError, ExprError};

use crate::task::TaskId;
use crate::transform::TransformError;

/// What went wrong for a single task. Never aborts sibling tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Configuration could not be rebuilt after transport.
    Decode { message: String },
    /// The transform collaborator reported a failure.
    Transform {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        col: Option<u32>,
    },
}

/// A per-task failure: the task id plus what happened.
///
/// Displays as `{message} [{id}]`, with `:{line},{col}` appended when the
/// transform supplied a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub id: TaskId,
    pub kind: TaskErrorKind,
}

impl TaskError {
    pub fn decode(id: TaskId, error: &DecodeError) -> Self {
        Self {
            id,
            kind: TaskErrorKind::Decode {
                message: error.to_string(),
            },
        }
    }

    /// A predicate that failed while being applied; `key` names the option
    /// it came from.
    pub fn predicate(id: TaskId, key: &str, error: &ExprError) -> Self {
        Self {
            id,
            kind: TaskErrorKind::Decode {
                message: format!("option `{key}`: {error}"),
            },
        }
    }

    pub fn transform(id: TaskId, error: TransformError) -> Self {
        Self {
            id,
            kind: TaskErrorKind::Transform {
                message: error.message,
                line: error.line,
                col: error.col,
            },
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self.kind, TaskErrorKind::Decode { .. })
    }

    pub fn is_transform(&self) -> bool {
        matches!(self.kind, TaskErrorKind::Transform { .. })
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TaskErrorKind::Decode { message } => write!(f, "{} [{}]", message, self.id),
            TaskErrorKind::Transform {
                message,
                line: Some(line),
                col: Some(col),
            } => write!(f, "{} [{}:{},{}]", message, self.id, line, col),
            TaskErrorKind::Transform { message, .. } => write!(f, "{} [{}]", message, self.id),
        }
    }
}

impl std::error::Error for TaskError {}

/// Aggregate error for Compactor operations.
#[derive(Debug, Error)]
pub enum CompactorError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias using [`CompactorError`].
pub type Result<T> = std::result::Result<T, CompactorError>;
