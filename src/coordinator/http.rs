//! HTTP API of a coordination node
//!
//! Node-to-node routes carry the coordination protocol; `/cluster/*` routes are
//! the boundary for the local front-end. Errors are `{ "error": "..." }` bodies
//! with a status derived from [`Error::to_http_status`].

use crate::common::{Error, Result};
use crate::coordinator::cluster_view::Member;
use crate::coordinator::node::CoordinationNode;
use crate::coordinator::protocol::*;
use crate::replication::ReplicationEntry;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(node: CoordinationNode) -> Router {
    let body_limit = node.config().transport.body_limit_bytes;

    Router::new()
        // Membership
        .route("/join-network", axum::routing::put(join_network))
        .route("/leave-network", axum::routing::put(leave_network))
        .route("/update-network", axum::routing::put(update_network))
        .route("/request-recovery", axum::routing::put(request_recovery))
        // Liveness and election
        .route("/heartbeat", axum::routing::get(heartbeat))
        .route("/request-vote", axum::routing::post(request_vote))
        .route("/new-leader", axum::routing::post(new_leader))
        .route("/info", axum::routing::get(info))
        .route("/raft-state", axum::routing::get(raft_state))
        // Replication
        .route("/request-file-log", axum::routing::get(request_file_log))
        .route("/missing-files", axum::routing::post(missing_files))
        .route("/file-change", axum::routing::put(file_change))
        // Front-end
        .route("/cluster/create", axum::routing::post(cluster_create))
        .route("/cluster/join", axum::routing::post(cluster_join))
        .route("/cluster/leave", axum::routing::post(cluster_leave))
        .route("/cluster/status", axum::routing::get(info))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

// === Membership ===

async fn join_network(
    State(node): State<CoordinationNode>,
    Json(member): Json<Member>,
) -> Result<Json<MembersResponse>> {
    let members = node.accept_join(member).await?;
    Ok(Json(MembersResponse { members }))
}

async fn leave_network(
    State(node): State<CoordinationNode>,
    Json(member): Json<Member>,
) -> Result<StatusCode> {
    node.require_primary()?;
    node.accept_leave(&member).await;
    Ok(StatusCode::OK)
}

async fn update_network(
    State(node): State<CoordinationNode>,
    Json(members): Json<Vec<Member>>,
) -> StatusCode {
    node.update_network(members).await;
    StatusCode::OK
}

async fn request_recovery(
    State(node): State<CoordinationNode>,
    Json(request): Json<RecoveryRequest>,
) -> Result<Json<MembersResponse>> {
    let members = node.recover_member(request.failed_node).await?;
    Ok(Json(MembersResponse { members }))
}

// === Liveness and election ===

async fn heartbeat(State(node): State<CoordinationNode>) -> StatusCode {
    node.reset_heartbeat_timer();
    StatusCode::OK
}

async fn request_vote(
    State(node): State<CoordinationNode>,
    Json(request): Json<VoteRequest>,
) -> Json<VoteResponse> {
    Json(node.handle_request_vote(request).await)
}

async fn new_leader(
    State(node): State<CoordinationNode>,
    Json(members): Json<Vec<Member>>,
) -> StatusCode {
    node.accept_leadership(members).await;
    StatusCode::OK
}

async fn info(State(node): State<CoordinationNode>) -> Json<NodeInfo> {
    Json(node.info())
}

async fn raft_state(State(node): State<CoordinationNode>) -> Json<RaftStateResponse> {
    Json(RaftStateResponse {
        raft_state: node.consensus_state(),
    })
}

// === Replication ===

async fn request_file_log(State(node): State<CoordinationNode>) -> Json<Vec<ReplicationEntry>> {
    Json(node.file_log())
}

async fn missing_files(
    State(node): State<CoordinationNode>,
    Json(request): Json<MissingFileRequest>,
) -> Result<Json<MissingFileResponse>> {
    Ok(Json(node.missing_file(&request.file_path).await?))
}

async fn file_change(
    State(node): State<CoordinationNode>,
    Json(change): Json<FileChange>,
) -> Result<StatusCode> {
    node.apply_file_change(change).await?;
    Ok(StatusCode::OK)
}

// === Front-end ===

async fn cluster_create(
    State(node): State<CoordinationNode>,
    Json(request): Json<CreateClusterRequest>,
) -> Result<Json<NodeInfo>> {
    node.create_cluster(&request.username).await?;
    Ok(Json(node.info()))
}

async fn cluster_join(
    State(node): State<CoordinationNode>,
    Json(request): Json<JoinClusterRequest>,
) -> Result<Json<NodeInfo>> {
    if request.address.trim().is_empty() {
        return Err(Error::InvalidConfig("join address is empty".into()));
    }
    node.request_join(&request.address, &request.username)
        .await?;
    Ok(Json(node.info()))
}

async fn cluster_leave(State(node): State<CoordinationNode>) -> Result<impl IntoResponse> {
    node.request_leave().await?;
    Ok(Json(json!({ "status": "left" })))
}
