// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fireworks-core.
//!
//! Every LaunchPad operation returns [`Result`]. Variants carry the ids involved so
//! that callers can decide whether to retry, rerun, or surface the failure.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the coordination layer.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// No firework exists with the given id.
    FireworkNotFound {
        /// The missing firework id.
        fw_id: i64,
    },

    /// No launch exists with the given id.
    LaunchNotFound {
        /// The missing launch id.
        launch_id: i64,
    },

    /// No workflow contains the given firework.
    WorkflowNotFound {
        /// The firework id used to look the workflow up.
        fw_id: i64,
    },

    /// The operation is not permitted from the firework's current state.
    InvalidState {
        /// The firework id.
        fw_id: i64,
        /// The operation that was refused.
        operation: &'static str,
        /// The state the firework was in.
        actual: String,
    },

    /// A submitted or appended workflow has dangling or cyclic links.
    InvalidGraph {
        /// What is wrong with the graph.
        reason: String,
    },

    /// The workflow lock could not be acquired within the wait budget.
    LockedWorkflow {
        /// A firework id of the locked workflow.
        fw_id: i64,
        /// How long the caller waited, in seconds.
        waited_secs: f64,
    },

    /// The id counters are missing; the LaunchPad has not been reset.
    NotInitialized,

    /// A document exceeded the store size limit and no fallback is configured.
    DocumentTooLarge {
        /// The launch whose action was too large.
        launch_id: i64,
        /// Serialized size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// A persisted entity could not be rebuilt.
    Deserialization {
        /// What was being decoded.
        entity: String,
        /// Decoder error details.
        details: String,
    },

    /// The worker descriptor is malformed.
    InvalidWorker {
        /// What is wrong with the worker.
        reason: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// File system access failed (launch directories, offline files, trackers).
    Io {
        /// The path involved.
        path: String,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::FireworkNotFound { .. } => "FIREWORK_NOT_FOUND",
            Self::LaunchNotFound { .. } => "LAUNCH_NOT_FOUND",
            Self::WorkflowNotFound { .. } => "WORKFLOW_NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::InvalidGraph { .. } => "INVALID_GRAPH",
            Self::LockedWorkflow { .. } => "LOCKED_WORKFLOW",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::DocumentTooLarge { .. } => "DOCUMENT_TOO_LARGE",
            Self::Deserialization { .. } => "DESERIALIZATION_FAILURE",
            Self::InvalidWorker { .. } => "INVALID_WORKER",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// True for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FireworkNotFound { .. }
                | Self::LaunchNotFound { .. }
                | Self::WorkflowNotFound { .. }
        )
    }

    pub(crate) fn invalid_graph(reason: impl Into<String>) -> Self {
        Self::InvalidGraph {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn deserialization(entity: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::Deserialization {
            entity: entity.into(),
            details: details.to_string(),
        }
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            details: err.to_string(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FireworkNotFound { fw_id } => {
                write!(f, "No Firework exists with id: {}", fw_id)
            }
            Self::LaunchNotFound { launch_id } => {
                write!(f, "No Launch exists with launch_id: {}", launch_id)
            }
            Self::WorkflowNotFound { fw_id } => {
                write!(f, "Could not find a Workflow with fw_id: {}", fw_id)
            }
            Self::InvalidState {
                fw_id,
                operation,
                actual,
            } => {
                write!(
                    f,
                    "Cannot {} fw_id {}: firework is {}",
                    operation, fw_id, actual
                )
            }
            Self::InvalidGraph { reason } => write!(f, "Invalid workflow graph: {}", reason),
            Self::LockedWorkflow { fw_id, waited_secs } => {
                write!(
                    f,
                    "Could not get workflow - LOCKED: {} (waited {:.1}s)",
                    fw_id, waited_secs
                )
            }
            Self::NotInitialized => write!(
                f,
                "Could not allocate ids: the LaunchPad is not initialized, perform a reset first"
            ),
            Self::DocumentTooLarge {
                launch_id,
                size,
                limit,
            } => {
                write!(
                    f,
                    "Action of launch {} is {} bytes, above the {} byte store limit. \
                     Set FIREWORKS_ACTION_FALLBACK to enable oversize action storage",
                    launch_id, size, limit
                )
            }
            Self::Deserialization { entity, details } => {
                write!(f, "Failed to deserialize {}: {}", entity, details)
            }
            Self::InvalidWorker { reason } => write!(f, "Invalid FWorker: {}", reason),
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::Io { path, details } => write!(f, "I/O error on {}: {}", path, details),
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during {}: {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: String::new(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization {
            entity: "document".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoreError::FireworkNotFound { fw_id: 1 }.error_code(),
            "FIREWORK_NOT_FOUND"
        );
        assert_eq!(CoreError::NotInitialized.error_code(), "NOT_INITIALIZED");
        assert_eq!(
            CoreError::LockedWorkflow {
                fw_id: 3,
                waited_secs: 1.0
            }
            .error_code(),
            "LOCKED_WORKFLOW"
        );
    }

    #[test]
    fn test_display_includes_ids() {
        let err = CoreError::InvalidState {
            fw_id: 7,
            operation: "reignite",
            actual: "RUNNING".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot reignite fw_id 7: firework is RUNNING");

        let err = CoreError::LaunchNotFound { launch_id: 12 };
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn test_too_large_mentions_remediation() {
        let err = CoreError::DocumentTooLarge {
            launch_id: 1,
            size: 20,
            limit: 10,
        };
        assert!(err.to_string().contains("FIREWORKS_ACTION_FALLBACK"));
    }

    #[test]
    fn test_not_found_family() {
        assert!(CoreError::WorkflowNotFound { fw_id: 1 }.is_not_found());
        assert!(!CoreError::NotInitialized.is_not_found());
    }

    #[test]
    fn test_from_serde_error() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.error_code(), "DESERIALIZATION_FAILURE");
    }
}
