//! Typed errors for conditions callers branch on.
//!
//! Plumbing errors travel as `anyhow::Error` with context; the variants here
//! are the ones the CLI and orchestration code inspect via `downcast_ref`.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::core::scope::ScopeParseError;
use crate::core::types::Status;

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionLoadFailed,
    SessionNotFound,
    TaskNotFound,
    TaskValidationFailed,
    ValidationInvalidInput,
    ValidationSchemaFailed,
    ValidationCircularDependency,
    ValidationNestedExecution,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SessionLoadFailed => "SESSION_LOAD_FAILED",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::TaskNotFound => "TASK_NOT_FOUND",
            ErrorCode::TaskValidationFailed => "TASK_VALIDATION_FAILED",
            ErrorCode::ValidationInvalidInput => "VALIDATION_INVALID_INPUT",
            ErrorCode::ValidationSchemaFailed => "VALIDATION_SCHEMA_FAILED",
            ErrorCode::ValidationCircularDependency => "VALIDATION_CIRCULAR_DEPENDENCY",
            ErrorCode::ValidationNestedExecution => "VALIDATION_NESTED_EXECUTION",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    ScopeParse(#[from] ScopeParseError),

    /// A session directory exists but cannot be used.
    #[error("session {} is unusable: {reason}", path.display())]
    SessionLoad { path: PathBuf, reason: String },

    #[error("no session found under {}", root.display())]
    SessionNotFound { root: PathBuf },

    #[error("item '{id}' not found in backlog")]
    ItemNotFound { id: String },

    #[error("item '{id}': illegal status transition {from} -> {to}")]
    InvalidTransition { id: String, from: Status, to: Status },

    #[error("item '{id}' has unmet dependencies: {}", unmet.join(", "))]
    DependenciesUnmet { id: String, unmet: Vec<String> },

    #[error("backlog schema validation failed: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("backlog invariants failed: {}", .0.join("; "))]
    InvalidBacklog(Vec<String>),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// A backlog was supplied for a session resumed from an unchanged document
    /// and does not match it.
    #[error(
        "backlog differs from session {session} (added: [{}], changed: [{}], removed: [{}]); revise the source document to start a delta session",
        added.join(", "),
        changed.join(", "),
        removed.join(", ")
    )]
    BacklogMismatch {
        session: String,
        added: Vec<String>,
        changed: Vec<String>,
        removed: Vec<String>,
    },

    #[error("nested pipeline execution detected (running pid {pid})")]
    NestedExecution { pid: String },
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::ScopeParse(_) => ErrorCode::ValidationInvalidInput,
            PipelineError::SessionLoad { .. } => ErrorCode::SessionLoadFailed,
            PipelineError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            PipelineError::ItemNotFound { .. } => ErrorCode::TaskNotFound,
            PipelineError::InvalidTransition { .. } | PipelineError::DependenciesUnmet { .. } => {
                ErrorCode::TaskValidationFailed
            }
            PipelineError::SchemaViolation(_) => ErrorCode::ValidationSchemaFailed,
            PipelineError::InvalidBacklog(_) | PipelineError::BacklogMismatch { .. } => {
                ErrorCode::ValidationInvalidInput
            }
            PipelineError::CircularDependency(_) => ErrorCode::ValidationCircularDependency,
            PipelineError::NestedExecution { .. } => ErrorCode::ValidationNestedExecution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_load_error_names_path_and_code() {
        let err = PipelineError::SessionLoad {
            path: PathBuf::from("plan/001_abcdefabcdef"),
            reason: "missing file tasks.json".to_string(),
        };
        assert!(err.to_string().contains("plan/001_abcdefabcdef"));
        assert_eq!(err.code().as_str(), "SESSION_LOAD_FAILED");
    }

    #[test]
    fn error_codes_serialize_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ValidationCircularDependency).expect("json");
        assert_eq!(json, "\"VALIDATION_CIRCULAR_DEPENDENCY\"");
    }
}
