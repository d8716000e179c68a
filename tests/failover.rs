//! Primary failure, election and takeover

mod common;

use common::{spawn_node, start_with, test_config, wait_until};
use std::time::Duration;
use tempfile::TempDir;
use worldsync::coordinator::RaftRole;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn follower_takes_over_after_primary_failure() {
    let x = spawn_node().await;
    let y = spawn_node().await;
    let z = spawn_node().await;
    x.node().create_cluster("alice").await.unwrap();
    y.node().request_join(&x.url(), "bob").await.unwrap();
    z.node().request_join(&x.url(), "carol").await.unwrap();

    let x_id = x.id();
    let term = y.node().term();
    x.running.shutdown().await;

    y.node().handle_primary_failure();
    let view = y.node().members();
    let old_primary = view.iter().find(|m| m.id == x_id).unwrap();
    assert!(!old_primary.alive);

    let y_node = y.node().clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let node = y_node.clone();
            async move { node.is_primary() }
        })
        .await
    );

    assert_eq!(y.node().term(), term + 1);
    assert_eq!(y.node().role(), RaftRole::Leader);
    let view = y.node().members();
    let old_primary = view.iter().find(|m| m.id == x_id).unwrap();
    assert!(!old_primary.alive);
    assert!(!old_primary.is_primary);

    // z voted for y and follows it
    let z_node = z.node().clone();
    let y_id = y.id();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let node = z_node.clone();
            let expected = Some(y_id.clone());
            async move { node.primary().map(|p| p.id) == expected }
        })
        .await
    );
    assert_eq!(z.node().role(), RaftRole::Follower);
    assert_eq!(z.node().term(), term + 1);
    assert_eq!(z.node().consensus_state().voted_for, Some(y.id()));

    z.running.shutdown().await;
    y.running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heartbeats_keep_follower_quiet_until_primary_dies() {
    let start = |dir: TempDir| {
        let mut config = test_config(dir.path());
        config.heartbeat.interval_ms = 100;
        config.heartbeat.check_interval_ms = 600;
        start_with(dir, config)
    };
    let x = start(TempDir::new().unwrap()).await;
    let y = start(TempDir::new().unwrap()).await;
    x.node().create_cluster("alice").await.unwrap();
    y.node().request_join(&x.url(), "bob").await.unwrap();
    let term = y.node().term();

    // Several check intervals pass; heartbeats keep re-arming the timer
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert!(!y.node().is_primary());
    assert_eq!(y.node().term(), term);
    assert!(x.node().is_primary());

    x.running.shutdown().await;

    let y_node = y.node().clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let node = y_node.clone();
            async move { node.is_primary() }
        })
        .await
    );
    assert_eq!(y.node().term(), term + 1);

    y.running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn primary_flags_unreachable_member_dead() {
    let x = spawn_node().await;
    let y = spawn_node().await;
    let z = spawn_node().await;
    x.node().create_cluster("alice").await.unwrap();
    y.node().request_join(&x.url(), "bob").await.unwrap();
    z.node().request_join(&x.url(), "carol").await.unwrap();
    let y_id = y.id();

    y.running.shutdown().await;
    assert_eq!(x.node().heartbeat_round().await, 1);

    let dead = x
        .node()
        .members()
        .into_iter()
        .find(|m| m.id == y_id)
        .unwrap();
    assert!(!dead.alive);

    // The flipped flag reached z
    let seen_by_z = z
        .node()
        .members()
        .into_iter()
        .find(|m| m.id == y_id)
        .unwrap();
    assert!(!seen_by_z.alive);

    z.running.shutdown().await;
    x.running.shutdown().await;
}
