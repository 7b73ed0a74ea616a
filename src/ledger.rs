//! Per-task vote collection.
//!
//! Votes are grouped by result value. Each voter sits in at most one group
//! per task: the consensus math treats a voter's correctness as a single
//! independent event, so a voter counted in two groups would be double
//! counted. Resubmitting the same result is idempotent.

use crate::{
    config::ConflictPolicy,
    error::{QuorumError, Result},
};
use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
};
use tracing::{debug, warn};

/// Mapping from result value to the distinct voters who reported it.
///
/// Iteration order carries no meaning.
pub type ResultGroups<V, R> = HashMap<R, HashSet<V>>;

/// What happened to an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The vote was recorded.
    Inserted,
    /// The voter had already reported this exact result; nothing changed.
    AlreadyVoted,
    /// The voter's earlier, different vote was withdrawn in favour of this one.
    Replaced,
}

/// Votes collected for a single task.
#[derive(Debug, Clone)]
pub struct TaskVotes<V, R> {
    groups: ResultGroups<V, R>,
    ballots: HashMap<V, R>,
}

impl<V, R> Default for TaskVotes<V, R> {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
            ballots: HashMap::new(),
        }
    }
}

impl<V, R> TaskVotes<V, R>
where
    V: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    /// Creates an empty vote set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `voter`'s vote for `result` under the given conflict policy.
    pub fn submit(&mut self, voter: V, result: R, policy: ConflictPolicy) -> Result<Submission> {
        let outcome = match self.ballots.get(&voter) {
            Some(existing) if *existing == result => return Ok(Submission::AlreadyVoted),
            Some(_) if policy == ConflictPolicy::Reject => {
                warn!("conflicting vote rejected");
                return Err(QuorumError::DuplicateVoteConflict);
            }
            Some(existing) => {
                let previous = existing.clone();
                self.withdraw(&voter, &previous);
                Submission::Replaced
            }
            None => Submission::Inserted,
        };
        self.groups
            .entry(result.clone())
            .or_default()
            .insert(voter.clone());
        self.ballots.insert(voter, result);
        debug!(groups = self.groups.len(), voters = self.ballots.len(), ?outcome, "vote recorded");
        Ok(outcome)
    }

    fn withdraw(&mut self, voter: &V, result: &R) {
        if let Some(group) = self.groups.get_mut(result) {
            group.remove(voter);
            if group.is_empty() {
                self.groups.remove(result);
            }
        }
    }

    /// Current result groups.
    pub fn groups(&self) -> &ResultGroups<V, R> {
        &self.groups
    }

    /// The result a voter reported, if any.
    pub fn ballot(&self, voter: &V) -> Option<&R> {
        self.ballots.get(voter)
    }

    /// Number of distinct voters.
    pub fn vote_count(&self) -> usize {
        self.ballots.len()
    }

    /// Returns true when no votes were recorded.
    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }
}

/// Vote collection for many tasks, keyed by task identifier.
#[derive(Debug, Clone)]
pub struct VoteLedger<T, V, R> {
    policy: ConflictPolicy,
    tasks: HashMap<T, TaskVotes<V, R>>,
}

impl<T, V, R> VoteLedger<T, V, R>
where
    T: Eq + Hash,
    V: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    /// Creates an empty ledger enforcing `policy` on conflicting votes.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            tasks: HashMap::new(),
        }
    }

    /// Records a vote; see [`TaskVotes::submit`].
    pub fn submit_vote(&mut self, task: T, voter: V, result: R) -> Result<Submission> {
        self.tasks
            .entry(task)
            .or_default()
            .submit(voter, result, self.policy)
    }

    /// Result groups for `task`, or `None` if it never received a vote.
    pub fn groups_for(&self, task: &T) -> Option<&ResultGroups<V, R>> {
        self.tasks.get(task).map(TaskVotes::groups)
    }

    /// Full vote state for `task`.
    pub fn task(&self, task: &T) -> Option<&TaskVotes<V, R>> {
        self.tasks.get(task)
    }

    /// Drops a task's votes once its voting window is over.
    pub fn close_task(&mut self, task: &T) -> Option<TaskVotes<V, R>> {
        self.tasks.remove(task)
    }

    /// Identifiers of the tasks currently holding votes.
    pub fn tasks(&self) -> impl Iterator<Item = &T> {
        self.tasks.keys()
    }

    /// Number of distinct voters on `task`.
    pub fn vote_count(&self, task: &T) -> usize {
        self.tasks.get(task).map_or(0, TaskVotes::vote_count)
    }
}
