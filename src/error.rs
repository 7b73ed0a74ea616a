//! Error type shared by every quorum component.
//!
//! None of these errors are fatal: the caller decides the scheduling
//! consequence (request more replicas, drop the task, fix configuration).

use thiserror::Error;

/// Failures surfaced by the ledger, engine, service and helpers.
#[derive(Debug, Error)]
pub enum QuorumError {
    /// A voter reported a second, different result for a task.
    #[error("voter already holds a vote for a different result on this task")]
    DuplicateVoteConflict,
    /// A credibility value fell outside the open interval `(0, 1)`.
    #[error("credibility {value} is outside (0, 1)")]
    InvalidCredibility {
        /// The offending value as supplied by the provider.
        value: f64,
    },
    /// Consensus was requested over zero result groups.
    #[error("no votes to compute consensus over")]
    EmptyVoteSet,
    /// An intermediate probability degenerated where a division needs it.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(&'static str),
    /// A configuration field is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The task has never received a vote.
    #[error("unknown task")]
    UnknownTask,
    /// The task was finalized and no longer accepts votes.
    #[error("task is closed")]
    TaskClosed,
    /// File-system failure while loading configuration or journals.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A JSON document could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A journal record failed digest verification or parsing.
    #[error("journal error: {0}")]
    Journal(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, QuorumError>;
