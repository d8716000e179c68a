//! Startup recovery: catch-up, resumption and self-promotion

mod common;

use common::{restart_node, spawn_node};
use worldsync::coordinator::{RaftRole, RecoveryOutcome};
use worldsync::replication::{ChangeKind, LocalChange};

fn change(kind: ChangeKind, path: &str) -> LocalChange {
    LocalChange {
        kind,
        file_path: path.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fresh_node_stays_idle() {
    let x = spawn_node().await;
    assert_eq!(x.running.recovery(), &RecoveryOutcome::Idle);
    assert!(!x.node().in_network());
    x.running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restarted_follower_catches_up() {
    let x = spawn_node().await;
    let y = spawn_node().await;
    let z = spawn_node().await;
    x.node().create_cluster("alice").await.unwrap();
    y.node().request_join(&x.url(), "bob").await.unwrap();
    z.node().request_join(&x.url(), "carol").await.unwrap();
    let z_id = z.id();

    // Replicated to everyone
    let world = x.node().world().clone();
    world.write("world/stats.json", b"stats").await.unwrap();
    x.node()
        .record_local_change(change(ChangeKind::Add, "world/stats.json"))
        .await
        .unwrap();

    let (z_dir, z_port) = z.stop().await;

    // Missed by z
    world.write("world/level.dat", b"level-v1").await.unwrap();
    x.node()
        .record_local_change(change(ChangeKind::Add, "world/level.dat"))
        .await
        .unwrap();
    world.write("world/region/r.0.0.mca", b"region").await.unwrap();
    x.node()
        .record_local_change(change(ChangeKind::Add, "world/region/r.0.0.mca"))
        .await
        .unwrap();
    world.write("world/level.dat", b"level-v2").await.unwrap();
    x.node()
        .record_local_change(change(ChangeKind::Change, "world/level.dat"))
        .await
        .unwrap();
    world.remove("world/stats.json").await.unwrap();
    x.node()
        .record_local_change(change(ChangeKind::Unlink, "world/stats.json"))
        .await
        .unwrap();

    // y saw every entry with the primary's order
    assert_eq!(y.node().file_log(), x.node().file_log());

    let z = restart_node(z_dir, z_port).await;
    assert_eq!(z.id(), z_id);
    match z.running.recovery() {
        RecoveryOutcome::Follower { primary, report } => {
            assert_eq!(primary, &x.id());
            assert_eq!(report.tail_len, 5);
            assert_eq!(report.fetched, 2);
            assert_eq!(report.removed, 1);
            assert_eq!(report.skipped, 0);
        }
        other => panic!("unexpected recovery outcome: {:?}", other),
    }

    let z_world = z.node().world();
    assert_eq!(z_world.read("world/level.dat").await.unwrap(), b"level-v2");
    assert_eq!(z_world.read("world/region/r.0.0.mca").await.unwrap(), b"region");
    assert!(z_world.read("world/stats.json").await.is_err());

    assert_eq!(z.node().file_log(), x.node().file_log());
    assert_eq!(z.node().log().next_order(), x.node().log().next_order());
    assert_eq!(z.node().term(), x.node().term());
    assert_eq!(z.node().role(), RaftRole::Follower);

    // The primary marked z alive again
    let seen = x
        .node()
        .members()
        .into_iter()
        .find(|m| m.id == z_id)
        .unwrap();
    assert!(seen.alive);

    for node in [z, y, x] {
        node.running.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restarted_primary_resumes() {
    let x = spawn_node().await;
    let y = spawn_node().await;
    x.node().create_cluster("alice").await.unwrap();
    y.node().request_join(&x.url(), "bob").await.unwrap();
    let x_id = x.id();

    let (x_dir, x_port) = x.stop().await;
    let x = restart_node(x_dir, x_port).await;

    assert_eq!(x.running.recovery(), &RecoveryOutcome::ResumedPrimary);
    assert_eq!(x.id(), x_id);
    assert!(x.node().is_primary());
    assert_eq!(x.node().role(), RaftRole::Leader);

    y.running.shutdown().await;
    x.running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lone_survivor_promotes_itself() {
    let x = spawn_node().await;
    let y = spawn_node().await;
    x.node().create_cluster("alice").await.unwrap();
    y.node().request_join(&x.url(), "bob").await.unwrap();
    let term = y.node().term();

    x.running.shutdown().await;
    let (y_dir, y_port) = y.stop().await;

    let y = restart_node(y_dir, y_port).await;
    assert_eq!(y.running.recovery(), &RecoveryOutcome::SelfPromoted);
    assert!(y.node().is_primary());
    assert_eq!(y.node().role(), RaftRole::Leader);
    assert_eq!(y.node().term(), term);

    y.running.shutdown().await;
}
