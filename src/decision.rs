//! Acceptance threshold over consensus metrics.
//!
//! The policy is stateless: the same outcome always yields the same decision.
//! Moving a task from `Pending` to a decision is driven externally, whenever
//! more votes arrive or the voting window closes.

use crate::{
    config::QuorumConfig,
    engine::ConsensusOutcome,
    error::{QuorumError, Result},
};
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use tracing::info;

/// Coarse state of a task's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    /// No consensus has been computed yet.
    Pending,
    /// A result reached the acceptance threshold.
    Accepted,
    /// Votes exist but no result is confident enough; solicit more replicas.
    Indeterminate,
    /// There is nothing to decide on.
    NoConsensus,
}

impl std::fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusStatus::Pending => write!(f, "pending"),
            ConsensusStatus::Accepted => write!(f, "accepted"),
            ConsensusStatus::Indeterminate => write!(f, "indeterminate"),
            ConsensusStatus::NoConsensus => write!(f, "no_consensus"),
        }
    }
}

/// Decision rendered for one consensus outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<R> {
    /// The result with the highest metric met the threshold.
    Accepted {
        /// Winning result.
        result: R,
        /// Its metric.
        confidence: f64,
    },
    /// The best metric is below the threshold, or several results share it.
    Indeterminate {
        /// Unique front-runner, if there is one.
        leader: Option<R>,
        /// Highest metric observed.
        confidence: f64,
    },
    /// Zero vote groups.
    NoConsensus,
}

impl<R> Decision<R> {
    /// Status corresponding to this decision.
    pub fn status(&self) -> ConsensusStatus {
        match self {
            Decision::Accepted { .. } => ConsensusStatus::Accepted,
            Decision::Indeterminate { .. } => ConsensusStatus::Indeterminate,
            Decision::NoConsensus => ConsensusStatus::NoConsensus,
        }
    }

    /// The accepted result, if any.
    pub fn accepted(&self) -> Option<&R> {
        match self {
            Decision::Accepted { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Threshold rule turning metrics into decisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    threshold: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::from_config(&QuorumConfig::default())
    }
}

impl DecisionPolicy {
    /// Creates a policy accepting results whose metric reaches `threshold`.
    pub fn new(threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(QuorumError::InvalidConfig(format!(
                "acceptance threshold {threshold} must lie in (0, 1)"
            )));
        }
        Ok(Self { threshold })
    }

    /// Uses the configured acceptance threshold.
    pub fn from_config(config: &QuorumConfig) -> Self {
        Self {
            threshold: config.acceptance_threshold,
        }
    }

    /// The acceptance threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decides on a computed outcome.
    pub fn decide<R: Eq + Hash + Clone>(&self, outcome: &ConsensusOutcome<R>) -> Decision<R> {
        let ranked = outcome.ranked();
        let Some(&(best, confidence)) = ranked.first() else {
            return Decision::NoConsensus;
        };
        let tied = ranked
            .get(1)
            .is_some_and(|(_, runner_up)| *runner_up == confidence);
        if tied {
            return Decision::Indeterminate {
                leader: None,
                confidence,
            };
        }
        if confidence >= self.threshold {
            info!(confidence, threshold = self.threshold, "result accepted");
            Decision::Accepted {
                result: best.clone(),
                confidence,
            }
        } else {
            Decision::Indeterminate {
                leader: Some(best.clone()),
                confidence,
            }
        }
    }

    /// Decides on the engine's answer, mapping an empty vote set to
    /// [`Decision::NoConsensus`]. Other engine errors are passed through.
    pub fn evaluate<R: Eq + Hash + Clone>(
        &self,
        computed: Result<ConsensusOutcome<R>>,
    ) -> Result<(Decision<R>, Option<ConsensusOutcome<R>>)> {
        match computed {
            Ok(outcome) => Ok((self.decide(&outcome), Some(outcome))),
            Err(QuorumError::EmptyVoteSet) => Ok((Decision::NoConsensus, None)),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::ConsensusEngine, ledger::ResultGroups};
    use std::collections::{HashMap, HashSet};

    fn outcome(entries: Vec<(char, Vec<u64>)>, scores: &[(u64, f64)]) -> ConsensusOutcome<char> {
        let groups: ResultGroups<u64, char> = entries
            .into_iter()
            .map(|(r, voters)| (r, voters.into_iter().collect::<HashSet<_>>()))
            .collect();
        let table: HashMap<u64, f64> = scores.iter().copied().collect();
        ConsensusEngine::default()
            .compute_with(&groups, |v| table.get(v).copied().unwrap_or(0.8))
            .unwrap()
    }

    #[test]
    fn accepts_reference_scenario() {
        let outcome = outcome(
            vec![('Z', vec![6, 7]), ('M', vec![8])],
            &[(6, 0.967), (7, 0.998), (8, 0.933)],
        );
        let decision = DecisionPolicy::new(0.99).unwrap().decide(&outcome);
        assert_eq!(decision.status(), ConsensusStatus::Accepted);
        assert_eq!(decision.accepted(), Some(&'Z'));
    }

    #[test]
    fn below_threshold_is_indeterminate() {
        let outcome = outcome(vec![('A', vec![1]), ('B', vec![2])], &[(1, 0.9), (2, 0.8)]);
        match DecisionPolicy::new(0.99).unwrap().decide(&outcome) {
            Decision::Indeterminate { leader, confidence } => {
                assert_eq!(leader, Some('A'));
                assert!(confidence < 0.99);
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn tie_at_the_top_is_indeterminate() {
        let outcome = outcome(vec![('A', vec![1]), ('B', vec![2])], &[]);
        let decision = DecisionPolicy::new(0.1).unwrap().decide(&outcome);
        assert_eq!(
            decision,
            Decision::Indeterminate {
                leader: None,
                confidence: outcome.metric(&'A').unwrap()
            }
        );
    }

    #[test]
    fn empty_vote_set_means_no_consensus() {
        let engine = ConsensusEngine::default();
        let groups: ResultGroups<u64, char> = HashMap::new();
        let (decision, outcome) = DecisionPolicy::default()
            .evaluate(engine.compute_with(&groups, |_| 0.8))
            .unwrap();
        assert_eq!(decision, Decision::NoConsensus);
        assert_eq!(decision.status(), ConsensusStatus::NoConsensus);
        assert!(outcome.is_none());
    }

    #[test]
    fn other_engine_errors_propagate() {
        let result = DecisionPolicy::default()
            .evaluate::<char>(Err(QuorumError::NumericDegeneracy("test")));
        assert!(matches!(result, Err(QuorumError::NumericDegeneracy(_))));
    }

    #[test]
    fn threshold_must_be_a_probability() {
        assert!(DecisionPolicy::new(0.0).is_err());
        assert!(DecisionPolicy::new(1.0).is_err());
        assert_eq!(DecisionPolicy::default().threshold(), 0.99);
    }
}
