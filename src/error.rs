//! Error types for task execution.
//!
//! Errors are classified by blast radius:
//! - `SourceError`: a single external collaborator call went wrong. A
//!   `Timeout` is kept distinct from other failures so callers can tell
//!   "the dependency hung" apart from "the dependency returned an error".
//! - `WorkerError`: a task-level failure. Step 1 of the research pipeline
//!   propagates these to the worker's status guard; later steps convert
//!   source errors into per-company step errors instead.

use thiserror::Error;

use crate::db::DbError;

/// Failure of a single external collaborator call.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("no result for lookup: {0}")]
    NotFound(String),

    #[error("helper process failed: {0}")]
    Process(String),

    #[error("bad payload from helper: {0}")]
    Payload(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Failed(String),
}

impl SourceError {
    /// True for the hard-timeout case (the isolated call was killed).
    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceError::Timeout(_))
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Payload(err.to_string())
    }
}

/// A task-level failure, surfaced to the worker's status guard.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("invalid task arguments: {0}")]
    InvalidArgs(String),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("company not found: {0}")]
    CompanyNotFound(String),

    #[error("no inbound message on file for company: {0}")]
    NoInboundMessage(String),

    #[error("no drafted reply on file for company: {0}")]
    NoDraftedReply(String),

    #[error("research source error: {0}")]
    Source(#[from] SourceError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_failure() {
        assert!(SourceError::Timeout(30).is_timeout());
        assert!(!SourceError::Failed("boom".into()).is_timeout());
        assert!(!SourceError::Process("exit 1".into()).is_timeout());
    }

    #[test]
    fn test_worker_error_carries_source_message() {
        let err = WorkerError::from(SourceError::Failed("no working name".into()));
        assert!(err.to_string().contains("no working name"));
    }
}
