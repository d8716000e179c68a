//! Best-effort fan-out to peers
//!
//! All calls run concurrently and are awaited together; a failing peer never stops
//! or delays the others. Callers get one outcome per peer.

use crate::common::Result;
use crate::coordinator::cluster_view::Member;
use futures_util::future::join_all;
use std::future::Future;

/// Result of one peer call
#[derive(Debug)]
pub struct PeerOutcome<T> {
    pub member: Member,
    pub result: Result<T>,
}

impl<T> PeerOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Call `f` for every peer concurrently and collect every outcome
pub async fn broadcast<T, F, Fut>(peers: Vec<Member>, f: F) -> Vec<PeerOutcome<T>>
where
    F: Fn(Member) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let calls = peers.into_iter().map(|member| {
        let call = f(member.clone());
        async move {
            PeerOutcome {
                member,
                result: call.await,
            }
        }
    });
    join_all(calls).await
}

/// Log failed outcomes and return how many peers succeeded
pub fn log_outcomes<T>(operation: &str, outcomes: &[PeerOutcome<T>]) -> usize {
    let mut succeeded = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(_) => succeeded += 1,
            Err(e) => tracing::warn!(
                "{} to {} ({}) failed: {}",
                operation,
                outcome.member.id,
                outcome.member.base_url(),
                e
            ),
        }
    }
    tracing::debug!(
        "{} completed: {}/{} peers reached",
        operation,
        succeeded,
        outcomes.len()
    );
    succeeded
}
