// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy surfaced by the data manager.
//!
//! | Kind           | Source                          | Retried |
//! |----------------|---------------------------------|---------|
//! | validation     | sanitizer, before any store call | no     |
//! | permission     | access policy or backend        | no      |
//! | conflict       | optimistic lock mismatch        | no      |
//! | transient      | network, timeout, unavailable   | yes     |

use std::time::Duration;

use thiserror::Error;

use crate::sanitize::ValidationError;
use crate::storage::StorageError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No active session")]
    Unauthenticated,

    #[error("Version conflict on '{collection}/{id}': expected {expected}, found {actual}")]
    Conflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Document '{collection}/{id}' not found")]
    NotFound { collection: String, id: String },

    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error(transparent)]
    Storage(StorageError),

    #[error("Operation '{operation}' failed after {attempts} attempts (max retries exceeded): {last_error}")]
    MaxRetriesExceeded {
        operation: String,
        attempts: u32,
        last_error: Box<DataError>,
    },

    #[error("Operation '{0}' cancelled: retry queue shut down")]
    Cancelled(String),
}

impl DataError {
    /// Worth another attempt?
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::Timeout { .. } => true,
            DataError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Category label for logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DataError::Validation(_) => "validation",
            DataError::PermissionDenied(_) | DataError::Unauthenticated => "permission",
            DataError::Conflict { .. } => "conflict",
            DataError::NotFound { .. } => "not_found",
            DataError::Timeout { .. } => "transient",
            DataError::Storage(e) if e.is_transient() => "transient",
            DataError::Storage(_) => "storage",
            DataError::MaxRetriesExceeded { .. } => "retries_exhausted",
            DataError::Cancelled(_) => "cancelled",
        }
    }
}

impl From<StorageError> for DataError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PermissionDenied(msg) => DataError::PermissionDenied(msg),
            StorageError::NotFound { collection, id } => DataError::NotFound { collection, id },
            StorageError::Conflict {
                collection,
                id,
                expected,
                actual,
            } => DataError::Conflict {
                collection,
                id,
                expected,
                actual,
            },
            other => DataError::Storage(other),
        }
    }
}
