//! Client for the `/cluster/*` routes of a local node

use crate::common::{normalize_base_url, Error, Result};
use crate::coordinator::protocol::{CreateClusterRequest, JoinClusterRequest, NodeInfo};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FrontendClient {
    client: Client,
    base_url: String,
}

impl FrontendClient {
    pub fn new(node_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(node_url),
        })
    }

    pub async fn create(&self, username: &str) -> Result<NodeInfo> {
        let response = self
            .client
            .post(format!("{}/cluster/create", self.base_url))
            .json(&CreateClusterRequest {
                username: username.to_string(),
            })
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn join(&self, address: &str, username: &str) -> Result<NodeInfo> {
        let response = self
            .client
            .post(format!("{}/cluster/join", self.base_url))
            .json(&JoinClusterRequest {
                address: address.to_string(),
                username: username.to_string(),
            })
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn leave(&self) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/cluster/leave", self.base_url))
            .send()
            .await?;
        Self::parse::<serde_json::Value>(response).await.map(|_| ())
    }

    pub async fn status(&self) -> Result<NodeInfo> {
        let response = self
            .client
            .get(format!("{}/cluster/status", self.base_url))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let reason = body
            .get("error")
            .and_then(|e| e.as_str())
            .map(String::from)
            .unwrap_or_else(|| status.to_string());
        Err(Error::Other(reason))
    }
}

/// Human-readable summary of a node's view
pub fn describe(info: &NodeInfo) -> String {
    let mut out = String::new();
    let me = &info.node;
    if !info.in_network {
        out.push_str("Not part of a cluster\n");
        out.push_str(&format!("  Up since: {}\n", info.started_at.to_rfc3339()));
        return out;
    }

    out.push_str(&format!(
        "Node {} ({}): {}, term {}\n",
        me.id,
        me.username.as_deref().unwrap_or("-"),
        info.raft_state.role,
        info.raft_state.current_term
    ));
    out.push_str(&format!("  Up since: {}\n", info.started_at.to_rfc3339()));
    match &info.primary {
        Some(primary) => out.push_str(&format!(
            "  Primary: {} at {}:{} (game port {})\n",
            primary.id, primary.address, primary.coordination_port, primary.workload_port
        )),
        None => out.push_str("  Primary: none\n"),
    }
    out.push_str(&format!("  Members ({}):\n", info.network.len()));
    for member in &info.network {
        out.push_str(&format!(
            "    {} {}:{} {}{}\n",
            member.id,
            member.address,
            member.coordination_port,
            if member.alive { "alive" } else { "dead" },
            if member.is_primary { " [primary]" } else { "" }
        ));
    }
    out
}
