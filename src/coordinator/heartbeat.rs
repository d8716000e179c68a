//! Heartbeats, failure detection and elections
//!
//! The primary pings every other member on a fixed interval. A follower arms a
//! one-shot check timer; when it expires the primary is considered failed and an
//! election starts after a randomized delay.

use crate::coordinator::broadcast::{broadcast, log_outcomes};
use crate::coordinator::consensus::election_delay;
use crate::coordinator::node::CoordinationNode;
use crate::coordinator::protocol::VoteRequest;
use std::sync::MutexGuard;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Timer tasks owned by a node
#[derive(Debug, Default)]
pub struct Routines {
    heartbeat_send: Option<JoinHandle<()>>,
    heartbeat_check: Option<JoinHandle<()>>,
    election_delay: Option<JoinHandle<()>>,
}

impl Routines {
    /// Abort every timer
    pub fn cancel_all(&mut self) {
        abort(&mut self.heartbeat_send);
        abort(&mut self.heartbeat_check);
        abort(&mut self.election_delay);
    }

    pub fn is_sending(&self) -> bool {
        self.heartbeat_send.is_some()
    }

    pub fn is_checking(&self) -> bool {
        self.heartbeat_check.is_some()
    }

    pub fn election_pending(&self) -> bool {
        self.election_delay.is_some()
    }

    // Each setter aborts the task it replaces

    fn set_sender(&mut self, task: JoinHandle<()>) {
        replace(&mut self.heartbeat_send, task);
    }

    fn set_check(&mut self, task: JoinHandle<()>) {
        replace(&mut self.heartbeat_check, task);
    }

    fn set_election(&mut self, task: JoinHandle<()>) {
        replace(&mut self.election_delay, task);
    }
}

impl Drop for Routines {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn abort(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}

fn replace(slot: &mut Option<JoinHandle<()>>, task: JoinHandle<()>) {
    abort(slot);
    *slot = Some(task);
}

impl CoordinationNode {
    pub(crate) fn routines(&self) -> MutexGuard<'_, Routines> {
        self.inner
            .routines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel every timer, then arm the ones matching the current role
    pub fn init_routines(&self) {
        let (in_network, is_primary) = {
            let state = self.state();
            (state.in_network, state.is_primary())
        };

        self.routines().cancel_all();
        if !in_network {
            return;
        }

        if is_primary {
            let node = self.clone();
            let interval = self.inner.config.heartbeat.interval();
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    node.heartbeat_round().await;
                }
            });
            self.routines().set_sender(task);
            tracing::debug!("Heartbeat sender armed ({:?})", interval);
        } else {
            self.arm_check_timer();
        }
    }

    /// (Re)arm the follower's failure-detection timer
    pub(crate) fn arm_check_timer(&self) {
        {
            let state = self.state();
            if !state.in_network || state.is_primary() {
                return;
            }
        }

        let node = self.clone();
        let check = self.inner.config.heartbeat.check_interval();
        let task = tokio::spawn(async move {
            tokio::time::sleep(check).await;
            node.handle_primary_failure();
        });

        self.routines().set_check(task);
    }

    /// A heartbeat from the primary arrived
    pub fn reset_heartbeat_timer(&self) {
        if !self.inner.config.heartbeat.reset_on_heartbeat {
            return;
        }
        self.clear_election_timeout();
        self.arm_check_timer();
    }

    /// One heartbeat round: ping every other member, flip liveness flags and push
    /// the list once when anything changed
    pub async fn heartbeat_round(&self) -> usize {
        let peers = {
            let state = self.state();
            if !state.is_primary() {
                return 0;
            }
            state.view.others(state.self_id())
        };
        if peers.is_empty() {
            return 0;
        }

        let client = &self.inner.client;
        let outcomes = broadcast(peers, |peer| async move { client.heartbeat(&peer).await }).await;
        let reached = log_outcomes("heartbeat", &outcomes);

        let changed = {
            let mut state = self.state();
            let mut changed = false;
            for outcome in &outcomes {
                let alive = outcome.is_ok();
                if state.view.set_alive(&outcome.member.id, alive) {
                    if alive {
                        tracing::info!("Member {} is back", outcome.member.id);
                    } else {
                        tracing::warn!("Member {} stopped answering", outcome.member.id);
                    }
                    changed = true;
                }
            }
            changed
        };

        if changed {
            self.propagate_list().await;
            self.persist_or_warn().await;
        }
        reached
    }

    /// The check timer expired: mark the primary dead and schedule an election
    pub fn handle_primary_failure(&self) {
        let primary = {
            let mut state = self.state();
            if !state.in_network || state.is_primary() {
                return;
            }
            match state.view.primary_mut() {
                Some(primary) => {
                    primary.alive = false;
                    Some(primary.id.clone())
                }
                None => None,
            }
        };

        let election = &self.inner.config.election;
        let delay = election_delay(
            &mut rand::thread_rng(),
            Duration::from_millis(election.base_delay_ms),
            Duration::from_millis(election.max_delay_ms),
        );
        tracing::warn!(
            "Primary {} failed, starting election in {:?}",
            primary.as_deref().unwrap_or("(none)"),
            delay
        );

        let node = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The election outlives this timer: it may cancel every routine itself
            tokio::spawn(async move { node.run_election().await });
        });

        let mut routines = self.routines();
        abort(&mut routines.heartbeat_check);
        routines.set_election(task);
    }

    /// Cancel a pending election trigger
    pub fn clear_election_timeout(&self) {
        abort(&mut self.routines().election_delay);
    }

    /// Start an election and take over unless a peer knows a higher term or a
    /// leadership notification arrived meanwhile
    pub async fn run_election(&self) {
        let (term, candidate_id, peers) = {
            let mut state = self.state();
            if !state.in_network || state.consensus.is_leader() {
                return;
            }
            let id = match state.identity.id.clone() {
                Some(id) => id,
                None => return,
            };
            let term = state.consensus.start_election(&id);
            (term, id, state.live_peers())
        };
        self.persist_or_warn().await;
        tracing::info!(
            "Election for term {}: asking {} live peers",
            term,
            peers.len()
        );

        let request = VoteRequest {
            term,
            candidate_id: candidate_id.clone(),
        };
        let client = &self.inner.client;
        let request = &request;
        let outcomes = broadcast(peers, |peer| async move {
            client.request_vote(&peer, request).await
        })
        .await;
        log_outcomes("request-vote", &outcomes);

        let granted = outcomes
            .iter()
            .filter(|o| matches!(&o.result, Ok(reply) if reply.vote_granted))
            .count();
        let highest = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|reply| reply.term))
            .max()
            .unwrap_or(term);
        tracing::info!(
            "Election for term {}: {} of {} votes granted",
            term,
            granted + 1,
            outcomes.len() + 1
        );

        enum Verdict {
            TakeOver,
            SteppedDown(u64),
            Lost,
        }
        let verdict = {
            let mut state = self.state();
            if highest > term && state.consensus.observe_term(highest) {
                Verdict::SteppedDown(highest)
            } else if !state.consensus.is_candidate() || state.consensus.term() != term {
                Verdict::Lost
            } else {
                Verdict::TakeOver
            }
        };

        match verdict {
            Verdict::TakeOver => self.assume_leadership().await,
            Verdict::SteppedDown(higher) => {
                tracing::info!("Term {} is behind {}, stepping down", term, higher);
                self.persist_or_warn().await;
                self.init_routines();
            }
            Verdict::Lost => {
                tracing::info!("Election for term {} superseded", term);
            }
        }
    }
}
