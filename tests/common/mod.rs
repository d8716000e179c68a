//! Helpers for tests running real nodes on loopback

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use worldsync::{Config, NodeServer, RunningNode};

/// Config for a loopback node whose files live under `dir`.
///
/// Heartbeat timers are long so tests drive failures explicitly; the election
/// back-off is short.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.node.address = "127.0.0.1".into();
    config.node.bind_address = "127.0.0.1".into();
    config.node.coordination_port = 0;
    config.node.state_path = dir.join("node.json");
    config.replication.world_dir = dir.join("world");
    config.replication.queue_path = dir.join("file_queue.json");
    config.replication.watch = false;
    config.replication.read_retry_delay_ms = 10;
    config.heartbeat.interval_ms = 60_000;
    config.heartbeat.check_interval_ms = 60_000;
    config.election.base_delay_ms = 100;
    config.election.max_delay_ms = 200;
    config.transport.request_timeout_ms = 2_000;
    config.transport.status_timeout_ms = 500;
    config
}

pub struct TestNode {
    pub dir: TempDir,
    pub running: RunningNode,
}

impl TestNode {
    pub fn node(&self) -> &worldsync::CoordinationNode {
        self.running.node()
    }

    pub fn url(&self) -> String {
        self.running.base_url()
    }

    pub fn port(&self) -> u16 {
        self.running.addr().port()
    }

    pub fn id(&self) -> String {
        self.node().id().unwrap_or_default()
    }

    /// Stop the node, keeping its files
    pub async fn stop(self) -> (TempDir, u16) {
        let port = self.port();
        self.running.shutdown().await;
        (self.dir, port)
    }
}

pub async fn start_with(dir: TempDir, config: Config) -> TestNode {
    let running = NodeServer::bind(config)
        .await
        .expect("bind node")
        .start()
        .await
        .expect("start node");
    TestNode { dir, running }
}

/// Fresh node in its own temp directory
pub async fn spawn_node() -> TestNode {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    start_with(dir, config).await
}

/// Bring a stopped node back on the same directory and port
pub async fn restart_node(dir: TempDir, port: u16) -> TestNode {
    let mut config = test_config(dir.path());
    config.node.coordination_port = port;
    start_with(dir, config).await
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
