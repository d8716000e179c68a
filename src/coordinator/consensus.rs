//! Term, vote and role state machine
//!
//! A reduced Raft: there is no log-index comparison gating leadership. A candidate
//! bumps its term, votes for itself, asks live peers for their vote and takes over
//! unless it learns of a higher term first. The engine only tracks state; callers
//! persist a [`ConsensusState`] snapshot after every change.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consensus role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftRole {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Persisted {term, vote, role} triple
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    #[serde(rename = "state")]
    pub role: RaftRole,
}

/// Term/vote/role state machine
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    state: ConsensusState,
}

impl ConsensusEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the engine from a persisted snapshot
    pub fn restore(state: ConsensusState) -> Self {
        Self { state }
    }

    /// Snapshot for persistence and the `raft-state` endpoint
    pub fn save_file(&self) -> ConsensusState {
        self.state.clone()
    }

    pub fn term(&self) -> u64 {
        self.state.current_term
    }

    pub fn role(&self) -> RaftRole {
        self.state.role
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.state.voted_for.as_deref()
    }

    pub fn is_leader(&self) -> bool {
        self.state.role == RaftRole::Leader
    }

    pub fn is_candidate(&self) -> bool {
        self.state.role == RaftRole::Candidate
    }

    /// Start election: next term, candidate, vote for self
    pub fn start_election(&mut self, self_id: &str) -> u64 {
        self.state.current_term += 1;
        self.state.role = RaftRole::Candidate;
        self.state.voted_for = Some(self_id.to_string());
        self.state.current_term
    }

    /// Answer a vote request. Returns whether the vote is granted.
    pub fn request_vote(&mut self, candidate_term: u64, candidate_id: &str) -> bool {
        let current = self.state.current_term;
        let grant = candidate_term > current
            || (candidate_term == current
                && self
                    .state
                    .voted_for
                    .as_deref()
                    .map_or(true, |voted| voted == candidate_id));

        if grant {
            self.state.current_term = candidate_term;
            self.state.voted_for = Some(candidate_id.to_string());
            self.state.role = RaftRole::Follower;
        }
        grant
    }

    /// Record a successful takeover
    pub fn promote(&mut self) {
        self.state.role = RaftRole::Leader;
    }

    /// Step down to follower, keeping term and vote
    pub fn step_down(&mut self) {
        self.state.role = RaftRole::Follower;
    }

    /// Adopt a higher term seen in a peer answer; lower terms are ignored
    pub fn observe_term(&mut self, term: u64) -> bool {
        if term > self.state.current_term {
            self.state.current_term = term;
            self.state.voted_for = None;
            self.state.role = RaftRole::Follower;
            true
        } else {
            false
        }
    }

    /// Follow an existing cluster: copy the primary's term, clear the vote
    pub fn adopt_term(&mut self, term: u64) {
        self.state = ConsensusState {
            current_term: term,
            voted_for: None,
            role: RaftRole::Follower,
        };
    }

    /// Back to the base state after leaving a cluster
    pub fn reset(&mut self) {
        self.state = ConsensusState::default();
    }
}

/// Randomized election delay: `min(base * r, cap)` with `r` in [0.5, 1.5)
pub fn election_delay<R: Rng + ?Sized>(rng: &mut R, base: Duration, cap: Duration) -> Duration {
    let factor: f64 = rng.gen_range(0.5..1.5);
    base.mul_f64(factor).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_start_election() {
        let mut engine = ConsensusEngine::new();
        let term = engine.start_election("node-a");
        assert_eq!(term, 1);
        assert_eq!(engine.role(), RaftRole::Candidate);
        assert_eq!(engine.voted_for(), Some("node-a"));
    }

    #[test]
    fn test_vote_once_per_term() {
        let mut engine = ConsensusEngine::new();
        assert!(engine.request_vote(3, "node-b"));
        assert!(!engine.request_vote(3, "node-c"));
        // Repeated request from the same candidate is granted again
        assert!(engine.request_vote(3, "node-b"));
        assert_eq!(engine.voted_for(), Some("node-b"));
    }

    #[test]
    fn test_stale_term_denied() {
        let mut engine = ConsensusEngine::restore(ConsensusState {
            current_term: 5,
            voted_for: None,
            role: RaftRole::Follower,
        });
        assert!(!engine.request_vote(4, "node-b"));
        assert_eq!(engine.term(), 5);
        assert_eq!(engine.voted_for(), None);
    }

    #[test]
    fn test_higher_term_demotes_leader() {
        let mut engine = ConsensusEngine::new();
        engine.start_election("node-a");
        engine.promote();
        assert!(engine.is_leader());

        assert!(engine.request_vote(2, "node-b"));
        assert_eq!(engine.role(), RaftRole::Follower);
        assert_eq!(engine.term(), 2);
    }

    #[test]
    fn test_candidate_rejects_same_term_rival() {
        let mut engine = ConsensusEngine::new();
        let term = engine.start_election("node-a");
        assert!(!engine.request_vote(term, "node-b"));
        assert!(engine.is_candidate());
    }

    #[test]
    fn test_term_never_decreases() {
        let mut engine = ConsensusEngine::new();
        let mut last = engine.term();
        let requests = [(2, "b"), (1, "c"), (2, "d"), (7, "e"), (3, "f")];
        for (i, (term, candidate)) in requests.iter().enumerate() {
            engine.request_vote(*term, candidate);
            assert!(engine.term() >= last);
            last = engine.term();
            if i % 2 == 0 {
                engine.start_election("a");
                assert!(engine.term() > last);
                last = engine.term();
            }
        }
        assert!(!engine.observe_term(1));
        assert_eq!(engine.term(), last);
    }

    #[test]
    fn test_adopt_and_reset() {
        let mut engine = ConsensusEngine::new();
        engine.start_election("a");
        engine.adopt_term(9);
        assert_eq!(engine.save_file().current_term, 9);
        assert_eq!(engine.voted_for(), None);
        assert_eq!(engine.role(), RaftRole::Follower);

        engine.reset();
        assert_eq!(engine.save_file(), ConsensusState::default());
    }

    #[test]
    fn test_state_serialization() {
        let state = ConsensusState {
            current_term: 4,
            voted_for: Some("n1".into()),
            role: RaftRole::Candidate,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["currentTerm"], 4);
        assert_eq!(json["votedFor"], "n1");
        assert_eq!(json["state"], "candidate");

        let back: ConsensusState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_election_delay_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let base = Duration::from_millis(800);
        let cap = Duration::from_millis(13_000);
        for _ in 0..10_000 {
            let delay = election_delay(&mut rng, base, cap);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay < Duration::from_millis(1_200));
        }
    }

    #[test]
    fn test_election_delay_capped() {
        let mut rng = StdRng::seed_from_u64(7);
        let cap = Duration::from_millis(13_000);
        for _ in 0..1_000 {
            let delay = election_delay(&mut rng, Duration::from_millis(20_000), cap);
            assert!(delay <= cap);
            assert!(delay >= Duration::from_millis(10_000));
        }
    }
}
