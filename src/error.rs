//! Error types for the escrow workflow
//!
//! Every rejected operation maps to a stable error kind plus a
//! human-readable reason. Version conflicts are retried internally by the
//! workflow before being surfaced; everything else reaches the caller
//! unchanged.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for workflow operations
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Job, milestone or user does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller lacks the required relationship to the resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Operation is illegal for the current Job/Milestone status
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed input (empty reviewer set, non-reviewer id, ...)
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Release attempted before the reviewer majority approved
    #[error("quorum not met: {approvals} of {threshold} required approvals")]
    QuorumNotMet { approvals: usize, threshold: usize },

    /// Milestone funds were already released
    #[error("milestone {index} of job {job_id} already released")]
    AlreadyReleased { job_id: Uuid, index: usize },

    /// Concurrent-mutation retry signal from the job store
    #[error("version conflict on job {0}")]
    VersionConflict(Uuid),

    /// The settlement ledger call failed or timed out
    #[error("settlement ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a validation error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create a ledger error
    pub fn ledger<S: Into<String>>(msg: S) -> Self {
        Self::LedgerUnavailable(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable kind for the API boundary
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::Invalid(_) => "invalid",
            Self::QuorumNotMet { .. } => "quorum_not_met",
            Self::AlreadyReleased { .. } => "already_released",
            Self::VersionConflict(_) => "version_conflict",
            Self::LedgerUnavailable(_) => "ledger_unavailable",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}
