#![deny(missing_docs)]

//! # credence
//!
//! **credence** decides which of several candidate results returned by
//! redundant, untrusted workers is correct, using nothing but each worker's
//! historical reliability ("credibility"). It is the validation step of a
//! volunteer or grid computing platform: a work unit is computed by several
//! anonymous workers, their answers are grouped, and a result is accepted
//! once its posterior probability of being correct clears a threshold.
//!
//! ## Components
//!
//! * **Credibility providers** in [`credibility`]: the
//!   [`CredibilityProvider`] trait plus a static table with a default score
//!   and a spot-check curve that rewards streaks of agreement.
//! * **Vote ledger** in [`ledger`]: per-task vote collection with idempotent
//!   resubmission and rejection of voters who change their answer.
//! * **Consensus engine** in [`engine`]: the posterior metric per result and
//!   the residual probability that every candidate is wrong.
//! * **Decision policy** in [`decision`]: the acceptance threshold.
//! * **Quorum service** in [`service`]: a thread-safe façade with per-task
//!   locking and credibility feedback once a task is accepted.
//! * **Settlement**, **simulation** and **journal** helpers for stake payouts,
//!   attack simulations and tamper-evident outcome logs.
//!
//! ## Usage
//!
//! ```rust
//! use credence::{QuorumConfig, QuorumService, StaticCredibility, ConsensusStatus};
//! use std::sync::Arc;
//!
//! let provider = StaticCredibility::from_scores(0.8, [(6u64, 0.967), (7, 0.998), (8, 0.933)])
//!     .unwrap();
//! let service = QuorumService::new(QuorumConfig::default(), Arc::new(provider)).unwrap();
//!
//! service.submit_vote("wu-1", 6, 'Z').unwrap();
//! service.submit_vote("wu-1", 7, 'Z').unwrap();
//! service.submit_vote("wu-1", 8, 'M').unwrap();
//!
//! let report = service.compute_consensus(&"wu-1").unwrap();
//! assert_eq!(report.status, ConsensusStatus::Accepted);
//! assert_eq!(report.accepted, Some('Z'));
//! ```

pub mod config;
pub mod credibility;
pub mod decision;
pub mod engine;
mod error;
pub mod journal;
pub mod ledger;
pub mod service;
pub mod settlement;
pub mod simulation;

pub use config::{ConflictPolicy, QuorumConfig};
pub use credibility::{
    checked_credibility, clamp_credibility, vote_weight, CredibilityProvider, CredibilityTable,
    FnCredibility, OutcomeTally, SpotCheckCredibility, StaticCredibility,
};
pub use decision::{ConsensusStatus, Decision, DecisionPolicy};
pub use engine::{ConsensusEngine, ConsensusOutcome};
pub use error::{QuorumError, Result};
pub use journal::{append_records, read_journal, verify_journal_line, JournalRecord, RankedMetric};
pub use ledger::{ResultGroups, Submission, TaskVotes, VoteLedger};
pub use service::{ConsensusReport, QuorumService};
pub use settlement::{KittyShare, Settlement, SettlementPolicy};
pub use simulation::{run_batch, single_run, BatchSummary, RunReport, Scenario, SimulationSettings};
