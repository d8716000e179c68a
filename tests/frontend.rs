//! Front-end client against real nodes

mod common;

use common::spawn_node;
use std::time::Duration;
use worldsync::coordinator::RaftRole;
use worldsync::ops::{describe, FrontendClient};

fn frontend(url: &str) -> FrontendClient {
    FrontendClient::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn frontend_create_join_leave() {
    let x = spawn_node().await;
    let y = spawn_node().await;

    let status = frontend(&x.url()).status().await.unwrap();
    assert!(!status.in_network);
    assert!(describe(&status).starts_with("Not part of a cluster"));

    let created = frontend(&x.url()).create("alice").await.unwrap();
    assert!(created.in_network);
    assert_eq!(created.raft_state.role, RaftRole::Leader);
    assert_eq!(created.node.username.as_deref(), Some("alice"));

    let joined = frontend(&y.url()).join(&x.url(), "bob").await.unwrap();
    assert_eq!(joined.network.len(), 2);
    assert_eq!(joined.primary.as_ref().unwrap().id, created.node.id);
    assert!(describe(&joined).contains("bob"));

    // Joining twice is refused with the node's reason
    let again = frontend(&y.url()).join(&x.url(), "bob").await;
    assert!(again.is_err());

    frontend(&y.url()).leave().await.unwrap();
    assert!(!y.node().in_network());

    y.running.shutdown().await;
    x.running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn frontend_leave_outside_cluster_fails() {
    let x = spawn_node().await;
    let result = frontend(&x.url()).leave().await;
    assert!(result.is_err());
    x.running.shutdown().await;
}
