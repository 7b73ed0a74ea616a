//! Thread-safe façade over the ledger, engine, policy and provider.
//!
//! Every task lives behind its own mutex: vote insertion is atomic with
//! respect to deduplication, a computation sees a consistent snapshot of the
//! votes, and at most one computation per task runs at a time. Distinct tasks
//! share nothing and proceed in parallel.

use crate::{
    config::QuorumConfig,
    credibility::CredibilityProvider,
    decision::{ConsensusStatus, Decision, DecisionPolicy},
    engine::{ConsensusEngine, ConsensusOutcome},
    error::{QuorumError, Result},
    ledger::{Submission, TaskVotes},
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};
use tracing::{debug, info};

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

/// Answer to a consensus query.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusReport<R: Eq + Hash> {
    /// Decision state.
    pub status: ConsensusStatus,
    /// Accepted result when `status` is `Accepted`.
    pub accepted: Option<R>,
    /// Metric per result; empty without votes.
    pub metrics: HashMap<R, f64>,
    /// Probability that no result is correct; absent without votes.
    pub residual: Option<f64>,
    /// Number of distinct voters considered.
    pub votes: usize,
}

impl<R: Eq + Hash + Clone> ConsensusReport<R> {
    fn new(decision: Decision<R>, outcome: Option<ConsensusOutcome<R>>, votes: usize) -> Self {
        let status = decision.status();
        let accepted = match decision {
            Decision::Accepted { result, .. } => Some(result),
            _ => None,
        };
        let (metrics, residual) = match outcome {
            Some(outcome) => {
                let (metrics, residual) = outcome.into_parts();
                (metrics, Some(residual))
            }
            None => (HashMap::new(), None),
        };
        Self {
            status,
            accepted,
            metrics,
            residual,
            votes,
        }
    }

    fn empty() -> Self {
        Self::new(Decision::NoConsensus, None, 0)
    }

    /// Metrics ordered by descending value.
    pub fn ranked(&self) -> Vec<(&R, f64)> {
        let mut ranked: Vec<(&R, f64)> = self.metrics.iter().map(|(r, m)| (r, *m)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

#[derive(Debug)]
struct TaskState<V, R> {
    votes: TaskVotes<V, R>,
    status: ConsensusStatus,
    closed: bool,
}

impl<V, R> Default for TaskState<V, R> {
    fn default() -> Self {
        Self {
            votes: TaskVotes::default(),
            status: ConsensusStatus::Pending,
            closed: false,
        }
    }
}

type TaskHandle<V, R> = Arc<Mutex<TaskState<V, R>>>;

/// Concurrent vote collection and consensus for many tasks.
pub struct QuorumService<T, V, R, P: ?Sized> {
    config: QuorumConfig,
    engine: ConsensusEngine,
    policy: DecisionPolicy,
    tasks: DashMap<T, TaskHandle<V, R>>,
    provider: Arc<P>,
}

impl<T, V, R, P> QuorumService<T, V, R, P>
where
    T: Eq + Hash + Clone + Debug,
    V: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
    P: CredibilityProvider<V> + ?Sized,
{
    /// Creates a service after validating `config`.
    pub fn new(config: QuorumConfig, provider: Arc<P>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: ConsensusEngine::new(&config),
            policy: DecisionPolicy::from_config(&config),
            config,
            tasks: DashMap::new(),
            provider,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    /// Shared credibility provider.
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    fn handle(&self, task: &T) -> Option<TaskHandle<V, R>> {
        self.tasks.get(task).map(|entry| Arc::clone(entry.value()))
    }

    fn is_current(&self, task: &T, handle: &TaskHandle<V, R>) -> bool {
        self.tasks
            .get(task)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), handle))
    }

    /// Records a vote for `task`.
    pub fn submit_vote(&self, task: T, voter: V, result: R) -> Result<Submission> {
        loop {
            let handle = Arc::clone(self.tasks.entry(task.clone()).or_default().value());
            let mut state = handle.lock();
            // close_task may have withdrawn the handle before we locked it.
            if !self.is_current(&task, &handle) {
                continue;
            }
            if state.closed {
                return Err(QuorumError::TaskClosed);
            }
            return state
                .votes
                .submit(voter, result, self.config.conflict_policy);
        }
    }

    /// Computes the current consensus for `task`.
    ///
    /// A task without votes reports `NoConsensus`.
    pub fn compute_consensus(&self, task: &T) -> Result<ConsensusReport<R>> {
        let Some(handle) = self.handle(task) else {
            return Ok(ConsensusReport::empty());
        };
        let mut state = handle.lock();
        let (decision, outcome) = self.evaluate(&mut state)?;
        debug!(?task, status = %decision.status(), "consensus evaluated");
        Ok(ConsensusReport::new(decision, outcome, state.votes.vote_count()))
    }

    /// Computes consensus and, when a result is accepted, reports each
    /// voter's agreement to the provider and closes the task.
    ///
    /// Tasks that are not accepted stay open for more votes.
    pub fn finalize(&self, task: &T) -> Result<ConsensusReport<R>> {
        let handle = self.handle(task).ok_or(QuorumError::UnknownTask)?;
        let mut state = handle.lock();
        if state.closed {
            return Err(QuorumError::TaskClosed);
        }
        let (decision, outcome) = self.evaluate(&mut state)?;
        let votes = state.votes.vote_count();
        if let Some(accepted) = decision.accepted() {
            for (result, voters) in state.votes.groups() {
                let agreed = result == accepted;
                for voter in voters {
                    self.provider.record_outcome(voter, agreed);
                }
            }
            state.votes = TaskVotes::default();
            state.closed = true;
            info!(?task, votes, "task finalized");
        }
        Ok(ConsensusReport::new(decision, outcome, votes))
    }

    fn evaluate(
        &self,
        state: &mut TaskState<V, R>,
    ) -> Result<(Decision<R>, Option<ConsensusOutcome<R>>)> {
        let computed = self.engine.compute(state.votes.groups(), &*self.provider);
        let (decision, outcome) = self.policy.evaluate(computed)?;
        state.status = decision.status();
        Ok((decision, outcome))
    }

    /// Last computed status; `Pending` before the first computation.
    pub fn status(&self, task: &T) -> Option<ConsensusStatus> {
        self.handle(task).map(|handle| {
            let state = handle.lock();
            state.status
        })
    }

    /// Number of distinct voters on `task`.
    pub fn vote_count(&self, task: &T) -> usize {
        self.handle(task).map_or(0, |handle| {
            let state = handle.lock();
            state.votes.vote_count()
        })
    }

    /// Withdraws a task entirely, without provider feedback.
    ///
    /// Returns the number of votes discarded, or `None` for an unknown task.
    pub fn close_task(&self, task: &T) -> Option<usize> {
        let (_, handle) = self.tasks.remove(task)?;
        let state = handle.lock();
        Some(state.votes.vote_count())
    }

    /// Identifiers of tracked tasks, including finalized ones.
    pub fn tasks(&self) -> Vec<T> {
        self.tasks.iter().map(|entry| entry.key().clone()).collect()
    }

    fn open_handles(&self) -> Vec<(T, TaskHandle<V, R>)> {
        // Task mutexes are never taken while a map shard is held.
        let handles: Vec<(T, TaskHandle<V, R>)> = self
            .tasks
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        handles
            .into_iter()
            .filter(|(_, handle)| !handle.lock().closed)
            .collect()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl<T, V, R, P> QuorumService<T, V, R, P>
where
    T: Eq + Hash + Clone + Debug + Send + Sync,
    V: Eq + Hash + Clone + Send,
    R: Eq + Hash + Clone + Send,
    P: CredibilityProvider<V> + ?Sized,
{
    /// Computes consensus for every open task in parallel.
    pub fn compute_all(&self) -> Vec<(T, Result<ConsensusReport<R>>)> {
        self.open_handles()
            .into_par_iter()
            .map(|(task, _)| {
                let report = self.compute_consensus(&task);
                (task, report)
            })
            .collect()
    }
}

#[cfg(target_arch = "wasm32")]
impl<T, V, R, P> QuorumService<T, V, R, P>
where
    T: Eq + Hash + Clone + Debug,
    V: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
    P: CredibilityProvider<V> + ?Sized,
{
    /// Computes consensus for every open task.
    pub fn compute_all(&self) -> Vec<(T, Result<ConsensusReport<R>>)> {
        self.open_handles()
            .into_iter()
            .map(|(task, _)| {
                let report = self.compute_consensus(&task);
                (task, report)
            })
            .collect()
    }
}
