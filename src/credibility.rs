//! Credibility providers: where voter reliability scores come from.
//!
//! The engine never owns trust scores. It asks a [`CredibilityProvider`] for
//! each voter's score and, once a task is accepted, reports back whether the
//! voter agreed with the accepted result. How (and whether) a provider turns
//! that feedback into new scores is its own business.

use crate::{
    config::QuorumConfig,
    error::{QuorumError, Result},
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::{collections::HashMap, hash::Hash};
use tracing::{trace, warn};

/// Source of per-voter credibility scores.
pub trait CredibilityProvider<V>: Send + Sync {
    /// Returns the probability that `voter` reports a correct result.
    ///
    /// Unknown voters receive the provider's default score. Values outside
    /// `(0, 1)` are tolerated and clamped by the engine.
    fn credibility(&self, voter: &V) -> f64;

    /// Records whether `voter` agreed with a task's accepted result.
    fn record_outcome(&self, voter: &V, agreed_with_accepted: bool);
}

/// Clamps a provider score into `[epsilon, 1 - epsilon]`.
///
/// Scores outside `(0, 1)` are logged as invalid before clamping; `NaN` is
/// replaced by `fallback`.
pub fn clamp_credibility(value: f64, epsilon: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        warn!(fallback, "credibility is NaN; using default");
        return fallback.clamp(epsilon, 1.0 - epsilon);
    }
    if value <= 0.0 || value >= 1.0 {
        warn!(value, epsilon, "credibility outside (0, 1); clamping");
    }
    value.clamp(epsilon, 1.0 - epsilon)
}

/// Strict validation for scores supplied by callers (tables, CLI input).
pub fn checked_credibility(value: f64) -> Result<f64> {
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(QuorumError::InvalidCredibility { value })
    }
}

/// Additive weight `-ln(1 - cr)` of a vote with credibility `cr`.
///
/// Weights of independent votes add the way their failure probabilities
/// multiply, which makes them convenient for comparing voters on one scale.
pub fn vote_weight(credibility: f64) -> f64 {
    -(-credibility).ln_1p()
}

/// Fixed lookup table with an explicit default for unknown voters.
///
/// Feedback does not change scores; it is tallied so callers can inspect
/// agreement history and feed it to a longer-lived store.
#[derive(Debug)]
pub struct StaticCredibility<V> {
    default: f64,
    scores: RwLock<HashMap<V, f64>>,
    tally: RwLock<HashMap<V, OutcomeTally>>,
}

/// Serialized credibility table, e.g. `{"default": 0.8, "scores": {"a": 0.9}}`.
///
/// `default` is optional; a missing one defers to the quorum configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "V: Deserialize<'de> + Eq + Hash"))]
pub struct CredibilityTable<V> {
    /// Score for voters absent from `scores`.
    #[serde(default)]
    pub default: Option<f64>,
    /// Known voters.
    #[serde(default)]
    pub scores: HashMap<V, f64>,
}

impl<V: Eq + Hash> CredibilityTable<V> {
    /// Turns the table into a provider, taking the default from `config`
    /// unless the table names its own.
    pub fn into_provider(self, config: &QuorumConfig) -> Result<StaticCredibility<V>> {
        let default = self.default.unwrap_or(config.default_credibility);
        StaticCredibility::from_scores(default, self.scores)
    }
}

/// Agreement counters for one voter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    /// Tasks where the voter matched the accepted result.
    pub agreed: u64,
    /// Tasks where the voter reported something else.
    pub disagreed: u64,
}

impl<V: Eq + Hash> StaticCredibility<V> {
    /// Creates an empty table answering `default` for everyone.
    pub fn new(default: f64) -> Result<Self> {
        Ok(Self {
            default: checked_credibility(default)?,
            scores: RwLock::new(HashMap::new()),
            tally: RwLock::new(HashMap::new()),
        })
    }

    /// Creates an empty table answering the configured default credibility.
    pub fn for_config(config: &QuorumConfig) -> Result<Self> {
        Self::new(config.default_credibility)
    }

    /// Builds a table from `(voter, score)` pairs.
    pub fn from_scores<I>(default: f64, scores: I) -> Result<Self>
    where
        I: IntoIterator<Item = (V, f64)>,
    {
        let table = Self::new(default)?;
        for (voter, score) in scores {
            table.set(voter, score)?;
        }
        Ok(table)
    }

    /// Sets (or replaces) a voter's score.
    pub fn set(&self, voter: V, score: f64) -> Result<()> {
        let score = checked_credibility(score)?;
        self.scores.write().insert(voter, score);
        Ok(())
    }

    /// Forgets a voter, who falls back to the default.
    pub fn remove(&self, voter: &V) -> Option<f64> {
        self.scores.write().remove(voter)
    }

    /// Score returned for unknown voters.
    pub fn default_score(&self) -> f64 {
        self.default
    }

    /// Agreement history recorded through feedback.
    pub fn tally(&self, voter: &V) -> OutcomeTally {
        self.tally.read().get(voter).copied().unwrap_or_default()
    }
}

impl<V> CredibilityProvider<V> for StaticCredibility<V>
where
    V: Eq + Hash + Clone + Send + Sync,
{
    fn credibility(&self, voter: &V) -> f64 {
        self.scores
            .read()
            .get(voter)
            .copied()
            .unwrap_or(self.default)
    }

    fn record_outcome(&self, voter: &V, agreed_with_accepted: bool) {
        let mut tally = self.tally.write();
        let entry = tally.entry(voter.clone()).or_default();
        if agreed_with_accepted {
            entry.agreed += 1;
        } else {
            entry.disagreed += 1;
        }
    }
}

/// Spot-check credibility curve `Cr(k) = 1 - f / (k + 1)`.
///
/// `f` is the assumed fraction of faulty workers and `k` the number of
/// accepted tasks a voter has agreed with since their last disagreement. A
/// fresh voter starts at `1 - f`; a disagreement resets the streak.
#[derive(Debug)]
pub struct SpotCheckCredibility<V> {
    fault_fraction: f64,
    streaks: RwLock<HashMap<V, u64>>,
}

impl<V: Eq + Hash> SpotCheckCredibility<V> {
    /// Creates a provider for the given fault fraction `f ∈ (0, 1)`.
    pub fn new(fault_fraction: f64) -> Result<Self> {
        if !(fault_fraction > 0.0 && fault_fraction < 1.0) {
            return Err(QuorumError::InvalidConfig(format!(
                "fault fraction {fault_fraction} must lie in (0, 1)"
            )));
        }
        Ok(Self {
            fault_fraction,
            streaks: RwLock::new(HashMap::new()),
        })
    }

    /// Evaluates the curve for a streak of `k` agreements.
    pub fn curve(&self, k: u64) -> f64 {
        1.0 - self.fault_fraction / (k as f64 + 1.0)
    }

    /// Current agreement streak of a voter.
    pub fn streak(&self, voter: &V) -> u64 {
        self.streaks.read().get(voter).copied().unwrap_or(0)
    }
}

impl<V> CredibilityProvider<V> for SpotCheckCredibility<V>
where
    V: Eq + Hash + Clone + Send + Sync,
{
    fn credibility(&self, voter: &V) -> f64 {
        self.curve(self.streak(voter))
    }

    fn record_outcome(&self, voter: &V, agreed_with_accepted: bool) {
        let mut streaks = self.streaks.write();
        let streak = streaks.entry(voter.clone()).or_insert(0);
        if agreed_with_accepted {
            *streak = streak.saturating_add(1);
        } else {
            trace!(previous = *streak, "disagreement resets spot-check streak");
            *streak = 0;
        }
    }
}

/// Adapts a plain function into a provider that ignores feedback.
pub struct FnCredibility<F>(
    /// Lookup from voter to score.
    pub F,
);

impl<F> std::fmt::Debug for FnCredibility<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCredibility").finish_non_exhaustive()
    }
}

impl<V, F> CredibilityProvider<V> for FnCredibility<F>
where
    F: Fn(&V) -> f64 + Send + Sync,
{
    fn credibility(&self, voter: &V) -> f64 {
        (self.0)(voter)
    }

    fn record_outcome(&self, _voter: &V, _agreed_with_accepted: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_falls_back_to_default() {
        let table = StaticCredibility::from_scores(0.8, [(6u64, 0.967), (7, 0.998)]).unwrap();
        assert_eq!(table.credibility(&6), 0.967);
        assert_eq!(table.credibility(&42), 0.8);
        table.remove(&6);
        assert_eq!(table.credibility(&6), 0.8);
    }

    #[test]
    fn configured_default_reaches_unknown_voters() {
        let config = QuorumConfig {
            default_credibility: 0.6,
            ..QuorumConfig::default()
        };
        let table = StaticCredibility::<u64>::for_config(&config).unwrap();
        assert_eq!(table.credibility(&1), 0.6);

        let parsed: CredibilityTable<String> =
            serde_json::from_str(r#"{"scores": {"alice": 0.9}}"#).unwrap();
        let provider = parsed.into_provider(&config).unwrap();
        assert_eq!(provider.credibility(&"alice".to_string()), 0.9);
        assert_eq!(provider.credibility(&"mallory".to_string()), 0.6);

        let own: CredibilityTable<String> =
            serde_json::from_str(r#"{"default": 0.7}"#).unwrap();
        assert_eq!(own.into_provider(&config).unwrap().default_score(), 0.7);
    }

    #[test]
    fn static_table_rejects_degenerate_scores() {
        let table = StaticCredibility::<u64>::new(0.8).unwrap();
        assert!(matches!(
            table.set(1, 1.0),
            Err(QuorumError::InvalidCredibility { value }) if value == 1.0
        ));
        assert!(StaticCredibility::<u64>::new(0.0).is_err());
    }

    #[test]
    fn static_table_tallies_feedback_without_rescoring() {
        let table = StaticCredibility::from_scores(0.8, [(1u64, 0.9)]).unwrap();
        table.record_outcome(&1, true);
        table.record_outcome(&1, true);
        table.record_outcome(&1, false);
        assert_eq!(
            table.tally(&1),
            OutcomeTally {
                agreed: 2,
                disagreed: 1
            }
        );
        assert_eq!(table.credibility(&1), 0.9);
    }

    #[test]
    fn spot_check_curve_rises_and_resets() {
        let provider = SpotCheckCredibility::<&str>::new(0.5).unwrap();
        assert_eq!(provider.credibility(&"w"), 0.5);
        provider.record_outcome(&"w", true);
        assert!((provider.credibility(&"w") - 0.75).abs() < 1e-12);
        provider.record_outcome(&"w", true);
        provider.record_outcome(&"w", true);
        assert!((provider.credibility(&"w") - 0.875).abs() < 1e-12);
        provider.record_outcome(&"w", false);
        assert_eq!(provider.streak(&"w"), 0);
        assert_eq!(provider.credibility(&"w"), 0.5);
    }

    #[test]
    fn spot_check_rejects_bad_fraction() {
        assert!(SpotCheckCredibility::<u8>::new(0.0).is_err());
        assert!(SpotCheckCredibility::<u8>::new(1.0).is_err());
    }

    #[test]
    fn clamp_handles_degenerate_values() {
        let eps = 1e-9;
        assert_eq!(clamp_credibility(0.0, eps, 0.8), eps);
        assert_eq!(clamp_credibility(1.0, eps, 0.8), 1.0 - eps);
        assert_eq!(clamp_credibility(-3.0, eps, 0.8), eps);
        assert_eq!(clamp_credibility(f64::NAN, eps, 0.8), 0.8);
        assert_eq!(clamp_credibility(0.5, eps, 0.8), 0.5);
    }

    #[test]
    fn vote_weight_grows_with_credibility() {
        assert!((vote_weight(0.8) - 5f64.ln()).abs() < 1e-12);
        assert!(vote_weight(0.9999) > vote_weight(0.99));
    }

    #[test]
    fn closures_act_as_providers() {
        let provider = FnCredibility(|voter: &u32| if *voter == 1 { 0.99 } else { 0.8 });
        assert_eq!(provider.credibility(&1), 0.99);
        assert_eq!(provider.credibility(&2), 0.8);
    }
}
