//! Error taxonomy for actuation calls

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a single target did not receive the action.
///
/// Target-level errors never abort sibling targets; they are collected into
/// [`TargetFailure`]s and reported through the aggregate result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub name: String,
    pub address: String,
    pub error: TargetError,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.address, self.error)
    }
}

/// Errors returned by the coordinator for a whole call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActuationError {
    /// Caller error, never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No target could be reached; nothing was issued.
    #[error("All connections failed: {}", join_addresses(.0))]
    AllConnectionsFailed(Vec<TargetFailure>),

    /// At least one target failed after resolution. Targets that succeeded
    /// are not rolled back.
    #[error("Actuation failed on {} target(s): {}", .0.len(), join_names(.0))]
    PartialFailure(Vec<TargetFailure>),

    /// A query against one target failed.
    #[error("{name} ({address}): {error}")]
    Query {
        name: String,
        address: String,
        error: TargetError,
    },
}

impl ActuationError {
    /// Every target-level failure carried by this error.
    pub fn failures(&self) -> &[TargetFailure] {
        match self {
            ActuationError::AllConnectionsFailed(f) | ActuationError::PartialFailure(f) => f,
            _ => &[],
        }
    }
}

fn join_addresses(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(|f| f.address.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_names(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.name, f.address))
        .collect::<Vec<_>>()
        .join(", ")
}
