//! Credibility-weighted consensus over result groups.
//!
//! For result groups `{r → voters(r)}` and credibilities `cr(v)`:
//!
//! * `Good(r) = Π cr(v)` is the chance every voter of `r` was right,
//! * `Bad(r) = Π (1 - cr(v))` the chance every voter of `r` was wrong,
//! * `AllBad = Π_r Bad(r)` and `OtherBad(r) = AllBad / Bad(r)`,
//! * `Z = AllBad + Σ_r Good(r) · OtherBad(r)`,
//! * `metric(r) = Good(r) · OtherBad(r) / Z` and `residual = AllBad / Z`.
//!
//! `metric(r)` is the posterior probability that `r` is the correct answer
//! when every voter's correctness is an independent Bernoulli draw and at most
//! one group is entirely correct. The residual is the probability that no
//! candidate is correct; metrics and residual sum to one.
//!
//! Dividing numerator and normalizer by `AllBad` gives the equivalent form
//! `metric(r) = odds(r) / (1 + Σ odds)` with `odds(r) = Good(r) / Bad(r)`.
//! The engine evaluates that form in the log domain: each voter contributes
//! `ln cr - ln(1 - cr)`, per-voter terms and per-group log-odds are summed in
//! sorted order, and the normalizer is a log-sum-exp. Results are therefore
//! identical under any iteration order of the underlying hash maps, and large
//! groups cannot underflow the products.

use crate::{
    config::QuorumConfig,
    credibility::{clamp_credibility, CredibilityProvider},
    error::{QuorumError, Result},
    ledger::ResultGroups,
};
use serde::Serialize;
use std::{collections::HashMap, hash::Hash};
use tracing::debug;

/// Posterior confidence per candidate result for one task.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusOutcome<R: Eq + Hash> {
    metrics: HashMap<R, f64>,
    residual: f64,
}

impl<R: Eq + Hash> ConsensusOutcome<R> {
    /// Metric of a single result, if it received votes.
    pub fn metric(&self, result: &R) -> Option<f64> {
        self.metrics.get(result).copied()
    }

    /// All metrics keyed by result.
    pub fn metrics(&self) -> &HashMap<R, f64> {
        &self.metrics
    }

    /// Consumes the outcome, returning the metric map and residual.
    pub fn into_parts(self) -> (HashMap<R, f64>, f64) {
        (self.metrics, self.residual)
    }

    /// Probability that no candidate result is correct.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Sum of all metrics and the residual; one up to rounding.
    pub fn total(&self) -> f64 {
        let mut values: Vec<f64> = self.metrics.values().copied().collect();
        values.push(self.residual);
        sorted_sum(values)
    }

    /// Results ordered by descending metric.
    ///
    /// Ties keep no particular order.
    pub fn ranked(&self) -> Vec<(&R, f64)> {
        let mut ranked: Vec<(&R, f64)> = self.metrics.iter().map(|(r, m)| (r, *m)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Computes consensus metrics from result groups and voter credibility.
#[derive(Debug, Clone, Copy)]
pub struct ConsensusEngine {
    epsilon: f64,
    default_credibility: f64,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new(&QuorumConfig::default())
    }
}

impl ConsensusEngine {
    /// Creates an engine using the clamp bound and default of `config`.
    pub fn new(config: &QuorumConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            default_credibility: config.default_credibility,
        }
    }

    /// Computes the outcome, querying `provider` once per voter.
    pub fn compute<V, R, P>(
        &self,
        groups: &ResultGroups<V, R>,
        provider: &P,
    ) -> Result<ConsensusOutcome<R>>
    where
        R: Eq + Hash + Clone,
        P: CredibilityProvider<V> + ?Sized,
    {
        self.compute_with(groups, |voter| provider.credibility(voter))
    }

    /// Computes the outcome with an arbitrary credibility lookup.
    ///
    /// Groups without voters are ignored. Fails with
    /// [`QuorumError::EmptyVoteSet`] when no group has a voter.
    pub fn compute_with<V, R, F>(
        &self,
        groups: &ResultGroups<V, R>,
        mut credibility: F,
    ) -> Result<ConsensusOutcome<R>>
    where
        R: Eq + Hash + Clone,
        F: FnMut(&V) -> f64,
    {
        let mut scored: Vec<(&R, f64)> = Vec::with_capacity(groups.len());
        for (result, voters) in groups {
            if voters.is_empty() {
                continue;
            }
            let terms: Vec<f64> = voters
                .iter()
                .map(|voter| {
                    let cr = clamp_credibility(
                        credibility(voter),
                        self.epsilon,
                        self.default_credibility,
                    );
                    cr.ln() - (-cr).ln_1p()
                })
                .collect();
            scored.push((result, sorted_sum(terms)));
        }
        if scored.is_empty() {
            return Err(QuorumError::EmptyVoteSet);
        }

        // The residual hypothesis ("every group is wrong") has log-odds 0.
        let mut exponents: Vec<f64> = scored.iter().map(|(_, log_odds)| *log_odds).collect();
        exponents.push(0.0);
        let log_normalizer = log_sum_exp(exponents);
        if !log_normalizer.is_finite() {
            return Err(QuorumError::NumericDegeneracy("normalizer is not finite"));
        }

        let metrics: HashMap<R, f64> = scored
            .into_iter()
            .map(|(result, log_odds)| (result.clone(), (log_odds - log_normalizer).exp()))
            .collect();
        let residual = (-log_normalizer).exp();
        debug!(groups = metrics.len(), residual, "consensus computed");
        Ok(ConsensusOutcome { metrics, residual })
    }
}

/// Sums after sorting so the result does not depend on input order.
pub(crate) fn sorted_sum(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    values.iter().sum()
}

/// `ln Σ exp(x)` over a non-empty set, stable for large magnitudes.
fn log_sum_exp(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let max = match values.last() {
        Some(max) => *max,
        None => return f64::NEG_INFINITY,
    };
    if !max.is_finite() {
        return max;
    }
    let scaled: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + scaled.ln()
}
