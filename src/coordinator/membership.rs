//! Membership operations: create, join, leave, leadership changes
//!
//! Only the primary mutates the authoritative member list. After every change it
//! pushes the full list to the other live members; followers replace their view
//! with whatever the primary sends.

use crate::common::{normalize_base_url, Error, Result};
use crate::coordinator::broadcast::{broadcast, log_outcomes};
use crate::coordinator::cluster_view::Member;
use crate::coordinator::node::CoordinationNode;
use crate::coordinator::peer_client::JoinOutcome;

impl CoordinationNode {
    /// Start a new cluster with this node as its only member and primary
    pub async fn create_cluster(&self, username: &str) -> Result<Member> {
        let me = {
            let mut state = self.state();
            if state.in_network {
                return Err(Error::AlreadyInCluster);
            }
            state.identity.username = Some(username.to_string());
            state.identity.regenerate();
            let me = state.identity.to_member(true);
            state.view.replace(vec![me.clone()]);
            state.in_network = true;
            state.consensus.promote();
            me
        };

        tracing::info!("Created cluster as {} ({})", me.id, username);
        self.persist().await?;
        self.init_routines();
        self.start_primary_duties();
        Ok(me)
    }

    /// Join the cluster reachable at `address`.
    ///
    /// A non-primary target redirects to its primary; the redirect is followed once.
    pub async fn request_join(&self, address: &str, username: &str) -> Result<Vec<Member>> {
        let candidate = {
            let mut state = self.state();
            if state.in_network {
                return Err(Error::AlreadyInCluster);
            }
            state.identity.username = Some(username.to_string());
            state.identity.regenerate();
            state.identity.to_member(false)
        };

        let target = normalize_base_url(address);
        let joined = match self.submit_join(&target, &candidate).await {
            Ok(members) => members,
            Err(e) => {
                self.state().identity.clear();
                return Err(e);
            }
        };

        let primary = joined.iter().find(|m| m.is_primary).cloned();
        let primary_url = primary
            .as_ref()
            .map(|p| p.base_url())
            .unwrap_or_else(|| target.clone());
        let term = match self.inner.client.raft_state(&primary_url).await {
            Ok(raft) => Some(raft.current_term),
            Err(e) => {
                tracing::warn!("Could not fetch term from {}: {}", primary_url, e);
                None
            }
        };

        let members = {
            let mut state = self.state();
            state.view.replace(joined);
            state.in_network = true;
            let term = term.unwrap_or_else(|| state.consensus.term());
            state.consensus.adopt_term(term);
            state.view.to_vec()
        };

        tracing::info!(
            "Joined cluster via {} as {} ({} members, primary {})",
            target,
            candidate.id,
            members.len(),
            primary.as_ref().map(|p| p.id.as_str()).unwrap_or("unknown")
        );
        self.persist().await?;
        self.init_routines();
        Ok(members)
    }

    async fn submit_join(&self, target: &str, candidate: &Member) -> Result<Vec<Member>> {
        let rejected = |peer: &str, e: Error| Error::JoinRejected {
            peer: peer.to_string(),
            reason: e.to_string(),
        };

        match self.inner.client.join_network(target, candidate).await {
            Ok(JoinOutcome::Accepted(members)) => Ok(members),
            Ok(JoinOutcome::Redirect(primary)) => {
                let primary = normalize_base_url(&primary);
                tracing::info!("{} is not primary, retrying join at {}", target, primary);
                match self.inner.client.join_network(&primary, candidate).await {
                    Ok(JoinOutcome::Accepted(members)) => Ok(members),
                    Ok(JoinOutcome::Redirect(_)) => Err(Error::JoinRejected {
                        peer: primary,
                        reason: "redirected twice".into(),
                    }),
                    Err(e) => Err(rejected(&primary, e)),
                }
            }
            Err(e) => Err(rejected(target, e)),
        }
    }

    /// Primary: admit a new member and push the list to everyone else
    pub async fn accept_join(&self, mut member: Member) -> Result<Vec<Member>> {
        self.require_primary()?;

        member.alive = true;
        member.is_primary = false;
        let (members, peers) = {
            let mut state = self.state();
            state.view.push(member.clone());
            let peers: Vec<Member> = state
                .live_peers()
                .into_iter()
                .filter(|m| m.id != member.id)
                .collect();
            (state.view.to_vec(), peers)
        };

        tracing::info!(
            "Member {} joined from {} ({} members)",
            member.id,
            member.base_url(),
            members.len()
        );
        self.push_list(peers, &members).await;
        self.persist_or_warn().await;
        Ok(members)
    }

    /// Leave the cluster and return to the idle state
    pub async fn request_leave(&self) -> Result<()> {
        let (me, primary, is_primary) = {
            let state = self.state();
            if !state.in_network {
                return Err(Error::NotInCluster);
            }
            (
                state.self_member(),
                state.view.primary().cloned(),
                state.is_primary(),
            )
        };

        if is_primary {
            self.accept_leave(&me).await;
            self.inner.workload.stop();
        } else {
            match primary {
                Some(primary) => {
                    if let Err(e) = self.inner.client.leave_network(&primary, &me).await {
                        tracing::warn!("Primary {} did not ack our leave: {}", primary.id, e);
                    }
                }
                None => tracing::warn!("No primary known, leaving without notice"),
            }
        }

        {
            let mut state = self.state();
            state.identity.clear();
            state.consensus.reset();
            state.view.clear();
            state.in_network = false;
        }
        self.routines().cancel_all();
        self.stop_primary_duties();

        tracing::info!("Left the cluster ({})", me.id);
        self.persist().await
    }

    /// Primary: drop a leaving member and push the list
    pub async fn accept_leave(&self, member: &Member) {
        if self.remove_member(&member.id).is_some() {
            tracing::info!("Member {} left", member.id);
        }
        self.propagate_list().await;
        self.persist_or_warn().await;
    }

    /// Remove a member by id. Unknown ids are logged and ignored.
    pub fn remove_member(&self, id: &str) -> Option<Member> {
        let removed = self.state().view.remove(id);
        if removed.is_none() {
            tracing::info!("Member {} is not in the view, nothing to remove", id);
        }
        removed
    }

    /// Push the current view to every other live member. Returns how many answered.
    pub async fn propagate_list(&self) -> usize {
        let (members, peers) = {
            let state = self.state();
            (state.view.to_vec(), state.live_peers())
        };
        self.push_list(peers, &members).await
    }

    async fn push_list(&self, peers: Vec<Member>, members: &[Member]) -> usize {
        if peers.is_empty() {
            return 0;
        }
        let client = &self.inner.client;
        let outcomes = broadcast(peers, |peer| async move {
            client.update_network(&peer, members).await
        })
        .await;
        log_outcomes("update-network", &outcomes)
    }

    /// Follower: replace the view with the list pushed by the primary
    pub async fn update_network(&self, members: Vec<Member>) {
        {
            let mut state = self.state();
            if !state.in_network {
                tracing::debug!("Ignoring member list: not in a cluster");
                return;
            }
            state.view.replace(members);
        }
        self.persist_or_warn().await;
    }

    /// Become primary: flag self, restart timers, tell every live peer
    pub async fn assume_leadership(&self) {
        let (term, members, peers) = {
            let mut state = self.state();
            if !state.in_network {
                return;
            }
            let me = state.identity.to_member(true);
            state.view.promote(me);
            state.consensus.promote();
            (
                state.consensus.term(),
                state.view.to_vec(),
                state.live_peers(),
            )
        };

        tracing::info!("Assuming leadership for term {}", term);
        self.init_routines();

        let client = &self.inner.client;
        let members = &members;
        let outcomes = broadcast(peers, |peer| async move {
            client.new_leader(&peer, members).await
        })
        .await;
        log_outcomes("new-leader", &outcomes);

        self.start_primary_duties();
        self.persist_or_warn().await;
    }

    /// Another node took over: adopt its list and follow it
    pub async fn accept_leadership(&self, members: Vec<Member>) {
        self.clear_election_timeout();

        let (was_primary, leader) = {
            let mut state = self.state();
            if !state.in_network {
                tracing::debug!("Ignoring new leader: not in a cluster");
                return;
            }
            let was_primary = state.is_primary();
            state.view.replace(members);
            state.consensus.step_down();
            (was_primary, state.view.primary().map(|p| p.id.clone()))
        };

        if was_primary {
            tracing::info!("Handing primary duties over");
            self.stop_primary_duties();
        }
        tracing::info!(
            "Following new leader {}",
            leader.as_deref().unwrap_or("(unknown)")
        );
        self.init_routines();
        self.persist_or_warn().await;
    }

    /// Primary: a restarted member reports back. Known members are marked alive,
    /// unknown ones appended; the list is pushed when anything changed.
    pub async fn recover_member(&self, member: Member) -> Result<Vec<Member>> {
        self.require_primary()?;

        let (changed, members) = {
            let mut state = self.state();
            let changed = if let Some(known) = state.view.get_mut(&member.id) {
                // A restarted member may come back on a different address
                let moved = known.address != member.address
                    || known.coordination_port != member.coordination_port
                    || known.workload_port != member.workload_port;
                known.address = member.address.clone();
                known.coordination_port = member.coordination_port;
                known.workload_port = member.workload_port;
                let revived = !known.alive;
                known.alive = true;
                moved || revived
            } else {
                let mut member = member.clone();
                member.alive = true;
                member.is_primary = false;
                state.view.push(member);
                true
            };
            (changed, state.view.to_vec())
        };

        tracing::info!("Member {} recovered", member.id);
        if changed {
            self.propagate_list().await;
            self.persist_or_warn().await;
        }
        Ok(members)
    }
}
