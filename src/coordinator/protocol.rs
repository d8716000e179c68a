//! Request and response bodies exchanged between nodes

use crate::coordinator::cluster_view::Member;
use crate::coordinator::consensus::ConsensusState;
use crate::replication::ChangeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// Authoritative member list returned by join and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<Member>,
}

/// Redirect body of a join sent to a non-primary node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectResponse {
    pub error: String,
    pub primary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    pub failed_node: Member,
}

/// A node's view of itself and the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node: Member,
    pub network: Vec<Member>,
    pub primary: Option<Member>,
    pub raft_state: ConsensusState,
    pub in_network: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaftStateResponse {
    pub raft_state: ConsensusState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingFileRequest {
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingFileResponse {
    /// Base64 file content
    pub content: String,
    /// BLAKE3 hex digest of the decoded content
    pub blake3: String,
}

/// One replicated file mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub event: ChangeKind,
    pub file_path: String,
    /// Base64 file content, empty for unlink
    #[serde(default)]
    pub file_content: String,
    pub order: u64,
}

// === Front-end requests ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinClusterRequest {
    pub address: String,
    pub username: String,
}
