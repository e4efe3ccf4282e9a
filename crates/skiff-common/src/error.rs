//! Error types for Skiff
//!
//! `SkiffError` is the error shared by every control-plane component. Stages
//! that keep going past individual failures collect them into
//! [`SkiffError::Multiple`] instead of returning early.

use crate::resource::{ResourceKind, ResourceRef};

/// Application-specific error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SkiffError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("{kind} {resource} not found")]
    NotFound {
        kind: ResourceKind,
        resource: ResourceRef,
    },

    #[error("no snapshot found for node {0}")]
    SnapshotNotFound(String),

    #[error("inconsistent snapshot: {0}")]
    Inconsistent(String),

    #[error("sanitizer '{sanitizer}' failed: {reason}")]
    Sanitization { sanitizer: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("snapshot backup error: {0}")]
    Backup(String),

    #[error("conflicting reports for {0}")]
    ReportMergeConflict(String),

    #[error("extension '{name}' failed: {reason}")]
    Extension { name: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<SkiffError>),
}

impl SkiffError {
    /// Collapses a list of errors: none -> `Ok`, one -> that error, more -> `Multiple`.
    pub fn from_errors(mut errors: Vec<SkiffError>) -> Result<(), SkiffError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SkiffError::Multiple(errors)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SkiffError::NotFound { .. } | SkiffError::SnapshotNotFound(_)
        )
    }
}

fn join_errors(errors: &[SkiffError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T, E = SkiffError> = std::result::Result<T, E>;
