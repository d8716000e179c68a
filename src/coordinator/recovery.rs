//! Startup recovery
//!
//! A node restored from its snapshot asks the other members who the primary is,
//! in view order, and acts on the first answer that names one. Nobody answering
//! means the node is alone and takes over.

use crate::common::Result;
use crate::coordinator::cluster_view::Member;
use crate::coordinator::node::CoordinationNode;
use crate::replication::{catch_up, CatchUpReport};

/// What recovery decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Not part of a cluster, nothing to do
    Idle,
    /// Peers confirmed this node is still the primary
    ResumedPrimary,
    /// Caught up with the primary and rejoined as follower
    Follower {
        primary: String,
        report: CatchUpReport,
    },
    /// Nobody answered; took over
    SelfPromoted,
}

impl CoordinationNode {
    /// Discover the primary and reconcile with it
    pub async fn recover(&self) -> RecoveryOutcome {
        let (self_id, peers) = {
            let state = self.state();
            if !state.in_network {
                tracing::info!("Not in a cluster, nothing to recover");
                return RecoveryOutcome::Idle;
            }
            (state.self_id().to_string(), state.view.others(state.self_id()))
        };

        tracing::info!("Recovering: polling {} known members", peers.len());
        for peer in &peers {
            let info = match self.inner.client.info(peer).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::debug!("{} did not answer: {}", peer.id, e);
                    continue;
                }
            };
            let primary = match info.primary {
                Some(primary) => primary,
                None => {
                    tracing::debug!("{} knows no primary, asking the next member", peer.id);
                    continue;
                }
            };

            if primary.id == self_id {
                tracing::info!("{} still sees us as primary, resuming", peer.id);
                self.resume_primary().await;
                return RecoveryOutcome::ResumedPrimary;
            }

            match self.follow(&primary).await {
                Ok(report) => {
                    return RecoveryOutcome::Follower {
                        primary: primary.id,
                        report,
                    }
                }
                Err(e) => {
                    tracing::warn!("Catch-up with {} failed: {}", primary.id, e);
                    break;
                }
            }
        }

        tracing::warn!("No primary reachable, taking over");
        self.assume_leadership().await;
        RecoveryOutcome::SelfPromoted
    }

    async fn resume_primary(&self) {
        self.state().consensus.promote();
        self.init_routines();
        self.start_primary_duties();
        self.persist_or_warn().await;
    }

    /// Report back to the primary, adopt its view and term, then catch up the log
    async fn follow(&self, primary: &Member) -> Result<CatchUpReport> {
        let me = self.self_member();
        let client = &self.inner.client;

        let members = client.request_recovery(primary, &me).await?;
        let raft = client.raft_state(&primary.base_url()).await?;
        {
            let mut state = self.state();
            state.view.replace(members);
            state.consensus.adopt_term(raft.current_term);
        }
        self.persist_or_warn().await;

        let report = catch_up(
            client,
            primary,
            &self.inner.log,
            &self.inner.world,
            self.inner.config.replication.recovery_batch_size,
        )
        .await?;

        self.init_routines();
        self.persist_or_warn().await;
        tracing::info!(
            "Recovered as follower of {} at term {}",
            primary.id,
            raft.current_term
        );
        Ok(report)
    }
}
