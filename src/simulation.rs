//! Monte-Carlo simulation of credibility-weighted voting under attack.
//!
//! A run keeps drawing workers from a [`Scenario`] and collecting their votes
//! until one result is accepted, then settles stakes. Batches of seeded runs
//! estimate how often the correct result wins and what honest workers and
//! attackers earn on average.

use crate::{
    config::{ConflictPolicy, QuorumConfig},
    credibility::FnCredibility,
    decision::{Decision, DecisionPolicy},
    engine::ConsensusEngine,
    error::{QuorumError, Result},
    ledger::TaskVotes,
    settlement::SettlementPolicy,
};
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    Rng, SeedableRng,
};
use serde::Serialize;
use tracing::{debug, info};

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

/// Result value reported by workers that compute correctly.
pub const CORRECT_RESULT: u64 = 0;
/// Result value agreed upon by colluding attackers.
pub const COLLUDED_RESULT: u64 = 1;

/// Who a simulated worker is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Follows the protocol.
    Honest,
    /// Member of the adversarial group.
    Attacker,
}

/// How a worker answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Answer {
    /// Always the correct result.
    Correct,
    /// Always the shared colluding result.
    Colluding,
    /// Correct, except with probability `bad_ratio` an arbitrary wrong value.
    Faulty {
        /// Probability of a wrong answer.
        bad_ratio: f64,
    },
}

impl Answer {
    fn draw<G: Rng + ?Sized>(&self, rng: &mut G) -> u64 {
        match *self {
            Answer::Correct => CORRECT_RESULT,
            Answer::Colluding => COLLUDED_RESULT,
            Answer::Faulty { bad_ratio } => {
                if rng.gen_bool(bad_ratio) {
                    rng.gen_range(COLLUDED_RESULT + 1..u64::MAX)
                } else {
                    CORRECT_RESULT
                }
            }
        }
    }
}

/// Share of the worker population behaving one way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerProfile {
    /// Honest or attacker.
    pub kind: WorkerKind,
    /// Relative weight in the population.
    pub ratio: f64,
    /// Answering behaviour.
    pub answer: Answer,
}

/// Worker population to draw voters from.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    profiles: Vec<WorkerProfile>,
    weights: WeightedIndex<f64>,
}

impl Scenario {
    /// Builds a scenario from weighted profiles.
    pub fn new(name: impl Into<String>, profiles: Vec<WorkerProfile>) -> Result<Self> {
        for profile in &profiles {
            if let Answer::Faulty { bad_ratio } = profile.answer {
                if !(0.0..=1.0).contains(&bad_ratio) {
                    return Err(QuorumError::InvalidConfig(format!(
                        "bad answer ratio {bad_ratio} must lie in [0, 1]"
                    )));
                }
            }
        }
        let weights = WeightedIndex::new(profiles.iter().map(|p| p.ratio))
            .map_err(|err| QuorumError::InvalidConfig(format!("worker ratios: {err}")))?;
        Ok(Self {
            name: name.into(),
            profiles,
            weights,
        })
    }

    /// Everyone is honest and correct.
    pub fn ideal() -> Result<Self> {
        Self::new(
            "ideal",
            vec![WorkerProfile {
                kind: WorkerKind::Honest,
                ratio: 1.0,
                answer: Answer::Correct,
            }],
        )
    }

    /// Attackers who nevertheless answer correctly.
    pub fn good_attackers(attackers: f64) -> Result<Self> {
        Self::with_attackers("good-attackers", attackers, Answer::Correct, Answer::Correct)
    }

    /// Attackers who all report the same wrong result.
    pub fn coordinated_attackers(attackers: f64) -> Result<Self> {
        Self::with_attackers(
            "coordinated-attackers",
            attackers,
            Answer::Colluding,
            Answer::Correct,
        )
    }

    /// A buggy application: honest workers sometimes return garbage.
    pub fn bad_app(bad_ratio: f64) -> Result<Self> {
        Self::new(
            "bad-app",
            vec![WorkerProfile {
                kind: WorkerKind::Honest,
                ratio: 1.0,
                answer: Answer::Faulty { bad_ratio },
            }],
        )
    }

    /// Correct attackers exploiting a buggy application.
    pub fn bad_app_attack(attackers: f64, bad_ratio: f64) -> Result<Self> {
        Self::with_attackers(
            "bad-app-attack",
            attackers,
            Answer::Correct,
            Answer::Faulty { bad_ratio },
        )
    }

    fn with_attackers(name: &str, attackers: f64, attack: Answer, honest: Answer) -> Result<Self> {
        if !(0.0..=1.0).contains(&attackers) {
            return Err(QuorumError::InvalidConfig(format!(
                "attacker ratio {attackers} must lie in [0, 1]"
            )));
        }
        Self::new(
            name,
            vec![
                WorkerProfile {
                    kind: WorkerKind::Attacker,
                    ratio: attackers,
                    answer: attack,
                },
                WorkerProfile {
                    kind: WorkerKind::Honest,
                    ratio: 1.0 - attackers,
                    answer: honest,
                },
            ],
        )
    }

    /// Resolves a preset by name.
    pub fn by_name(name: &str, attackers: f64, bad_ratio: f64) -> Result<Self> {
        match name {
            "ideal" => Self::ideal(),
            "good-attackers" => Self::good_attackers(attackers),
            "coordinated-attackers" => Self::coordinated_attackers(attackers),
            "bad-app" => Self::bad_app(bad_ratio),
            "bad-app-attack" => Self::bad_app_attack(attackers, bad_ratio),
            other => Err(QuorumError::InvalidConfig(format!(
                "unknown scenario `{other}`"
            ))),
        }
    }

    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn draw<G: Rng + ?Sized>(&self, rng: &mut G) -> &WorkerProfile {
        &self.profiles[self.weights.sample(rng)]
    }
}

/// Knobs of a simulated deployment.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSettings {
    /// Acceptance threshold.
    pub target: f64,
    /// Credibility the platform assigns to honest workers.
    pub honest_credibility: f64,
    /// Credibility the platform assigns to attackers.
    pub attacker_credibility: f64,
    /// Stakes and fee.
    pub settlement: SettlementPolicy,
    /// Give up after this many votes without acceptance.
    pub max_votes: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            target: 0.999,
            honest_credibility: 0.8,
            attacker_credibility: 0.8,
            settlement: SettlementPolicy::default(),
            max_votes: 10_000,
        }
    }
}

type SimVoter = (WorkerKind, u64);

/// Outcome of a single simulated task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Accepted result, or `None` if the vote cap was hit first.
    pub accepted: Option<u64>,
    /// Votes collected.
    pub votes: usize,
    /// Honest workers that took part.
    pub honest_workers: usize,
    /// Net payout to honest workers.
    pub honest_profit: f64,
    /// Attackers that took part.
    pub attackers: usize,
    /// Net payout to attackers.
    pub attacker_profit: f64,
}

impl RunReport {
    /// Returns true when the correct result was accepted.
    pub fn succeeded(&self) -> bool {
        self.accepted == Some(CORRECT_RESULT)
    }
}

/// Simulates one task until acceptance or the vote cap.
pub fn single_run<G: Rng + ?Sized>(
    scenario: &Scenario,
    settings: &SimulationSettings,
    rng: &mut G,
) -> Result<RunReport> {
    let config = QuorumConfig {
        acceptance_threshold: settings.target,
        default_credibility: settings.honest_credibility,
        ..QuorumConfig::default()
    };
    config.validate()?;
    let engine = ConsensusEngine::new(&config);
    let policy = DecisionPolicy::from_config(&config);
    let (honest_cr, attacker_cr) = (settings.honest_credibility, settings.attacker_credibility);
    let provider = FnCredibility(move |voter: &SimVoter| match voter.0 {
        WorkerKind::Honest => honest_cr,
        WorkerKind::Attacker => attacker_cr,
    });

    let mut votes: TaskVotes<SimVoter, u64> = TaskVotes::new();
    let mut next_id = 0u64;
    let accepted = loop {
        if votes.vote_count() >= settings.max_votes {
            break None;
        }
        let worker = scenario.draw(rng);
        let answer = worker.answer.draw(rng);
        votes.submit((worker.kind, next_id), answer, ConflictPolicy::Reject)?;
        next_id += 1;
        let outcome = engine.compute(votes.groups(), &provider)?;
        if let Decision::Accepted { result, .. } = policy.decide(&outcome) {
            break Some(result);
        }
    };

    let mut report = RunReport {
        accepted,
        votes: votes.vote_count(),
        honest_workers: 0,
        honest_profit: 0.0,
        attackers: 0,
        attacker_profit: 0.0,
    };
    for voters in votes.groups().values() {
        for (kind, _) in voters {
            match kind {
                WorkerKind::Honest => report.honest_workers += 1,
                WorkerKind::Attacker => report.attackers += 1,
            }
        }
    }
    if let Some(result) = accepted {
        let settlement = settings
            .settlement
            .settle(votes.groups(), &result, &provider)?;
        report.honest_profit = settlement.total(|(kind, _)| *kind == WorkerKind::Honest);
        report.attacker_profit = settlement.total(|(kind, _)| *kind == WorkerKind::Attacker);
    }
    debug!(votes = report.votes, accepted = ?report.accepted, "simulated run finished");
    Ok(report)
}

/// Aggregate statistics over a batch of runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Runs performed.
    pub runs: usize,
    /// Runs accepting the correct result.
    pub successes: usize,
    /// Runs accepting a wrong result.
    pub failures: usize,
    /// Runs that hit the vote cap.
    pub unresolved: usize,
    /// Mean votes per run.
    pub mean_votes: f64,
    /// Total net payout to honest workers.
    pub honest_profit_total: f64,
    /// Mean net payout per honest participation.
    pub honest_profit_mean: f64,
    /// Total net payout to attackers.
    pub attacker_profit_total: f64,
    /// Mean net payout per attacker participation.
    pub attacker_profit_mean: f64,
}

impl BatchSummary {
    fn from_runs(runs: &[RunReport]) -> Self {
        let mut summary = BatchSummary {
            runs: runs.len(),
            ..BatchSummary::default()
        };
        let (mut votes, mut honest, mut attackers) = (0usize, 0usize, 0usize);
        for run in runs {
            match run.accepted {
                Some(CORRECT_RESULT) => summary.successes += 1,
                Some(_) => summary.failures += 1,
                None => summary.unresolved += 1,
            }
            votes += run.votes;
            honest += run.honest_workers;
            attackers += run.attackers;
            summary.honest_profit_total += run.honest_profit;
            summary.attacker_profit_total += run.attacker_profit;
        }
        summary.mean_votes = ratio(votes as f64, runs.len());
        summary.honest_profit_mean = ratio(summary.honest_profit_total, honest);
        summary.attacker_profit_mean = ratio(summary.attacker_profit_total, attackers);
        summary
    }
}

fn ratio(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Runs `samples` independent simulations seeded from `seed`.
///
/// Run `i` uses `seed + i`, so batches are reproducible regardless of how
/// they are scheduled across threads.
pub fn run_batch(
    scenario: &Scenario,
    settings: &SimulationSettings,
    samples: usize,
    seed: u64,
) -> Result<BatchSummary> {
    let run = |i: usize| {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
        single_run(scenario, settings, &mut rng)
    };
    #[cfg(not(target_arch = "wasm32"))]
    let runs: Vec<RunReport> = (0..samples)
        .into_par_iter()
        .map(run)
        .collect::<Result<_>>()?;
    #[cfg(target_arch = "wasm32")]
    let runs: Vec<RunReport> = (0..samples).map(run).collect::<Result<_>>()?;

    let summary = BatchSummary::from_runs(&runs);
    info!(
        scenario = scenario.name(),
        runs = summary.runs,
        successes = summary.successes,
        failures = summary.failures,
        "simulation batch finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ideal_population_always_succeeds() {
        let scenario = Scenario::ideal().unwrap();
        let summary = run_batch(&scenario, &SimulationSettings::default(), 20, 7).unwrap();
        assert_eq!(summary.runs, 20);
        assert_eq!(summary.successes, 20);
        assert_eq!(summary.attacker_profit_total, 0.0);
        // 0.8-credibility voters need five unanimous votes to clear 0.999.
        assert_eq!(summary.mean_votes, 5.0);
    }

    #[test]
    fn unanimous_run_pays_the_fee_to_honest_workers() {
        let scenario = Scenario::ideal().unwrap();
        let settings = SimulationSettings::default();
        let mut rng = StdRng::seed_from_u64(1);
        let report = single_run(&scenario, &settings, &mut rng).unwrap();
        assert!(report.succeeded());
        assert_eq!(report.attackers, 0);
        assert!((report.honest_profit - settings.settlement.task_fee).abs() < 1e-9);
    }

    #[test]
    fn batches_are_reproducible() {
        let scenario = Scenario::coordinated_attackers(0.2).unwrap();
        let settings = SimulationSettings::default();
        let first = run_batch(&scenario, &settings, 16, 42).unwrap();
        let second = run_batch(&scenario, &settings, 16, 42).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.successes + first.failures + first.unresolved, 16);
    }

    #[test]
    fn vote_cap_leaves_run_unresolved() {
        let scenario = Scenario::coordinated_attackers(0.5).unwrap();
        let settings = SimulationSettings {
            max_votes: 1,
            ..SimulationSettings::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let report = single_run(&scenario, &settings, &mut rng).unwrap();
        assert_eq!(report.accepted, None);
        assert_eq!(report.votes, 1);
        assert_eq!(report.honest_profit + report.attacker_profit, 0.0);
    }

    #[test]
    fn faulty_answers_are_never_the_correct_value() {
        let mut rng = StdRng::seed_from_u64(9);
        let answer = Answer::Faulty { bad_ratio: 1.0 };
        for _ in 0..100 {
            assert!(answer.draw(&mut rng) > COLLUDED_RESULT);
        }
    }

    #[test]
    fn scenario_names_resolve() {
        for name in [
            "ideal",
            "good-attackers",
            "coordinated-attackers",
            "bad-app",
            "bad-app-attack",
        ] {
            assert_eq!(Scenario::by_name(name, 0.1, 0.05).unwrap().name(), name);
        }
        assert!(Scenario::by_name("chaos", 0.1, 0.1).is_err());
        assert!(Scenario::coordinated_attackers(1.5).is_err());
        assert!(Scenario::bad_app(-0.1).is_err());
    }
}
