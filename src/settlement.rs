//! Stake settlement once a task has an accepted result.
//!
//! Every voter bonds the same stake. Dissenters forfeit theirs; the forfeited
//! stakes plus the task's fee form the kitty, which agreeing voters share in
//! proportion to their credibility or, optionally, to their additive vote
//! weight `-ln(1 - cr)`.

use crate::{
    credibility::{vote_weight, CredibilityProvider},
    engine::sorted_sum,
    error::{QuorumError, Result},
    ledger::ResultGroups,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, hash::Hash};

/// How agreeing voters split the kitty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KittyShare {
    /// Proportional to credibility.
    #[default]
    Credibility,
    /// Proportional to [`vote_weight`]; favours near-certain voters strongly.
    VoteWeight,
}

impl KittyShare {
    fn weight(self, credibility: f64) -> f64 {
        match self {
            KittyShare::Credibility => credibility,
            KittyShare::VoteWeight => vote_weight(credibility),
        }
    }
}

/// Fee and stake applied to each settled task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementPolicy {
    /// Amount the task submitter pays into the kitty.
    pub task_fee: f64,
    /// Stake every voter bonds and forfeits on disagreement.
    pub stake: f64,
    /// Sharing rule among agreeing voters.
    #[serde(default)]
    pub share: KittyShare,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            task_fee: 1.0,
            stake: 0.5,
            share: KittyShare::Credibility,
        }
    }
}

/// Net balance change per voter for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement<V: Eq + Hash> {
    /// Signed payout per voter: positive for winners, `-stake` for dissenters.
    pub payouts: HashMap<V, f64>,
    /// Amount distributed among the agreeing voters.
    pub kitty: f64,
}

impl<V: Eq + Hash> Settlement<V> {
    /// Payout of one voter, zero for non-participants.
    pub fn payout(&self, voter: &V) -> f64 {
        self.payouts.get(voter).copied().unwrap_or(0.0)
    }

    /// Sum of payouts over the voters selected by `filter`.
    pub fn total<F: Fn(&V) -> bool>(&self, filter: F) -> f64 {
        sorted_sum(
            self.payouts
                .iter()
                .filter(|(voter, _)| filter(*voter))
                .map(|(_, amount)| *amount)
                .collect(),
        )
    }
}

impl SettlementPolicy {
    /// Settles `groups` against the accepted result.
    pub fn settle<V, R, P>(
        &self,
        groups: &ResultGroups<V, R>,
        accepted: &R,
        provider: &P,
    ) -> Result<Settlement<V>>
    where
        V: Eq + Hash + Clone,
        R: Eq + Hash,
        P: CredibilityProvider<V> + ?Sized,
    {
        let winners = groups
            .get(accepted)
            .filter(|voters| !voters.is_empty())
            .ok_or(QuorumError::EmptyVoteSet)?;
        let dissenters = groups
            .iter()
            .filter(|(result, _)| *result != accepted)
            .flat_map(|(_, voters)| voters.iter());

        let mut payouts = HashMap::new();
        let mut forfeited = 0usize;
        for voter in dissenters {
            payouts.insert(voter.clone(), -self.stake);
            forfeited += 1;
        }
        let kitty = self.stake * forfeited as f64 + self.task_fee;

        let weights: Vec<(&V, f64)> = winners
            .iter()
            .map(|voter| {
                let weight = self.share.weight(provider.credibility(voter));
                (voter, weight.max(0.0))
            })
            .collect();
        let weight = sorted_sum(weights.iter().map(|(_, w)| *w).collect());
        if weight <= 0.0 || !weight.is_finite() {
            return Err(QuorumError::NumericDegeneracy(
                "winning group carries no credibility weight",
            ));
        }
        for (voter, w) in weights {
            payouts.insert(voter.clone(), kitty * w / weight);
        }
        Ok(Settlement { payouts, kitty })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credibility::{FnCredibility, StaticCredibility};
    use std::collections::HashSet;

    fn reference_groups() -> ResultGroups<u64, char> {
        let mut groups = ResultGroups::new();
        groups.insert('Z', HashSet::from([6, 7]));
        groups.insert('M', HashSet::from([8]));
        groups
    }

    #[test]
    fn winners_share_kitty_by_credibility() {
        let provider =
            StaticCredibility::from_scores(0.8, [(6u64, 0.967), (7, 0.998), (8, 0.933)]).unwrap();
        let policy = SettlementPolicy {
            task_fee: 1.0,
            stake: 3.0,
            ..SettlementPolicy::default()
        };
        let settlement = policy.settle(&reference_groups(), &'Z', &provider).unwrap();
        assert_eq!(settlement.kitty, 4.0);
        assert_eq!(settlement.payout(&8), -3.0);
        let expected_6 = 4.0 * 0.967 / (0.967 + 0.998);
        assert!((settlement.payout(&6) - expected_6).abs() < 1e-12);
        assert!((settlement.total(|v| *v != 8) - 4.0).abs() < 1e-12);
        // Conservation: winners gain what dissenters and the submitter pay in.
        assert!((settlement.total(|_| true) - policy.task_fee).abs() < 1e-12);
        assert_eq!(settlement.payout(&99), 0.0);
    }

    #[test]
    fn weighted_share_favours_reliable_voters() {
        let provider = StaticCredibility::from_scores(0.8, [(6u64, 0.9), (7, 0.99)]).unwrap();
        let mut groups = ResultGroups::new();
        groups.insert('Z', HashSet::from([6, 7]));
        let policy = SettlementPolicy {
            share: KittyShare::VoteWeight,
            ..SettlementPolicy::default()
        };
        let settlement = policy.settle(&groups, &'Z', &provider).unwrap();
        // -ln(0.1) : -ln(0.01) is 1 : 2.
        assert!((settlement.payout(&6) - 1.0 / 3.0).abs() < 1e-12);
        assert!((settlement.payout(&7) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn certain_voter_makes_weighted_share_degenerate() {
        let provider = FnCredibility(|_: &u64| 1.0);
        let mut groups = ResultGroups::new();
        groups.insert('Z', HashSet::from([6]));
        let policy = SettlementPolicy {
            share: KittyShare::VoteWeight,
            ..SettlementPolicy::default()
        };
        assert!(matches!(
            policy.settle(&groups, &'Z', &provider),
            Err(QuorumError::NumericDegeneracy(_))
        ));
    }

    #[test]
    fn unanimous_task_pays_only_the_fee() {
        let provider = StaticCredibility::<u64>::new(0.8).unwrap();
        let mut groups = ResultGroups::new();
        groups.insert("ok", HashSet::from([1u64, 2]));
        let settlement = SettlementPolicy::default()
            .settle(&groups, &"ok", &provider)
            .unwrap();
        assert_eq!(settlement.kitty, 1.0);
        assert!((settlement.payout(&1) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn accepted_result_must_have_voters() {
        let provider = StaticCredibility::<u64>::new(0.8).unwrap();
        assert!(matches!(
            SettlementPolicy::default().settle(&reference_groups(), &'Q', &provider),
            Err(QuorumError::EmptyVoteSet)
        ));
    }
}
