//! HTTP client for node-to-node calls
//!
//! Every call carries a bounded timeout. Heartbeat and info use the short status
//! timeout, everything else the request timeout. A peer that does not answer in
//! time is reported as an error, never waited on.

use crate::common::config::TransportConfig;
use crate::common::{decode_content, content_digest, Error, Result};
use crate::coordinator::cluster_view::Member;
use crate::coordinator::consensus::ConsensusState;
use crate::coordinator::protocol::*;
use crate::replication::ReplicationEntry;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Outcome of a join request
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Accepted(Vec<Member>),
    /// The target is not primary; retry against this base URL
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct PeerClient {
    client: Client,
    request_timeout: Duration,
    status_timeout: Duration,
}

impl PeerClient {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.status_timeout())
            // Join redirects are followed explicitly, once
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            request_timeout: config.request_timeout(),
            status_timeout: config.status_timeout(),
        })
    }

    /// Submit `candidate` to the node at `base_url`
    pub async fn join_network(&self, base_url: &str, candidate: &Member) -> Result<JoinOutcome> {
        let response = self
            .client
            .put(format!("{}/join-network", base_url))
            .timeout(self.request_timeout)
            .json(candidate)
            .send()
            .await?;

        if response.status() == StatusCode::TEMPORARY_REDIRECT {
            let redirect: RedirectResponse = response.json().await?;
            return Ok(JoinOutcome::Redirect(redirect.primary));
        }
        let body: MembersResponse = Self::expect_json(base_url, response).await?;
        Ok(JoinOutcome::Accepted(body.members))
    }

    pub async fn leave_network(&self, primary: &Member, leaving: &Member) -> Result<()> {
        let request = self
            .client
            .put(format!("{}/leave-network", primary.base_url()))
            .json(leaving);
        self.send_empty(&primary.base_url(), request, self.request_timeout)
            .await
    }

    pub async fn update_network(&self, peer: &Member, members: &[Member]) -> Result<()> {
        let request = self
            .client
            .put(format!("{}/update-network", peer.base_url()))
            .json(members);
        self.send_empty(&peer.base_url(), request, self.request_timeout)
            .await
    }

    pub async fn heartbeat(&self, peer: &Member) -> Result<()> {
        let request = self.client.get(format!("{}/heartbeat", peer.base_url()));
        self.send_empty(&peer.base_url(), request, self.status_timeout)
            .await
    }

    pub async fn request_vote(&self, peer: &Member, vote: &VoteRequest) -> Result<VoteResponse> {
        let request = self
            .client
            .post(format!("{}/request-vote", peer.base_url()))
            .json(vote);
        self.send_json(&peer.base_url(), request, self.request_timeout)
            .await
    }

    pub async fn new_leader(&self, peer: &Member, members: &[Member]) -> Result<()> {
        let request = self
            .client
            .post(format!("{}/new-leader", peer.base_url()))
            .json(members);
        self.send_empty(&peer.base_url(), request, self.request_timeout)
            .await
    }

    pub async fn info(&self, peer: &Member) -> Result<NodeInfo> {
        let request = self.client.get(format!("{}/info", peer.base_url()));
        self.send_json(&peer.base_url(), request, self.status_timeout)
            .await
    }

    pub async fn raft_state(&self, base_url: &str) -> Result<ConsensusState> {
        let request = self.client.get(format!("{}/raft-state", base_url));
        let body: RaftStateResponse = self
            .send_json(base_url, request, self.request_timeout)
            .await?;
        Ok(body.raft_state)
    }

    pub async fn request_recovery(&self, primary: &Member, failed: &Member) -> Result<Vec<Member>> {
        let request = self
            .client
            .put(format!("{}/request-recovery", primary.base_url()))
            .json(&RecoveryRequest {
                failed_node: failed.clone(),
            });
        let body: MembersResponse = self
            .send_json(&primary.base_url(), request, self.request_timeout)
            .await?;
        Ok(body.members)
    }

    pub async fn request_file_log(&self, primary: &Member) -> Result<Vec<ReplicationEntry>> {
        let request = self
            .client
            .get(format!("{}/request-file-log", primary.base_url()));
        self.send_json(&primary.base_url(), request, self.request_timeout)
            .await
    }

    /// Fetch one file from the primary.
    /// `None` when the primary no longer has it.
    pub async fn missing_file(&self, primary: &Member, file_path: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .post(format!("{}/missing-files", primary.base_url()))
            .timeout(self.request_timeout)
            .json(&MissingFileRequest {
                file_path: file_path.to_string(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: MissingFileResponse = Self::expect_json(&primary.base_url(), response).await?;
        let content = decode_content(&body.content)?;
        let digest = content_digest(&content);
        if digest != body.blake3 {
            return Err(Error::Corrupted(format!(
                "{}: digest mismatch, expected {}, got {}",
                file_path, body.blake3, digest
            )));
        }
        Ok(Some(content))
    }

    pub async fn file_change(&self, peer: &Member, change: &FileChange) -> Result<()> {
        let request = self
            .client
            .put(format!("{}/file-change", peer.base_url()))
            .json(change);
        self.send_empty(&peer.base_url(), request, self.request_timeout)
            .await
    }

    async fn send_empty(&self, peer: &str, request: RequestBuilder, timeout: Duration) -> Result<()> {
        let response = request.timeout(timeout).send().await?;
        Self::check_status(peer, response).await.map(|_| ())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        peer: &str,
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<T> {
        let response = request.timeout(timeout).send().await?;
        Self::expect_json(peer, response).await
    }

    async fn expect_json<T: DeserializeOwned>(peer: &str, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(peer, response).await?;
        Ok(response.json().await?)
    }

    async fn check_status(peer: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());
        Err(Error::PeerRejected {
            peer: peer.to_string(),
            status: status.as_u16(),
            reason,
        })
    }
}
