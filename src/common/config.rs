//! Configuration for worldsync nodes
//!
//! Values come from (lowest to highest priority) the built-in defaults, an optional
//! TOML file and `WORLDSYNC__SECTION__KEY` environment variables. The node binary
//! applies its command-line flags on top.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for overrides (`WORLDSYNC__NODE__COORDINATION_PORT=9000`)
pub const ENV_PREFIX: &str = "WORLDSYNC";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity and state location of this node
    pub node: NodeConfig,

    /// Heartbeat timers
    pub heartbeat: HeartbeatConfig,

    /// Election back-off
    pub election: ElectionConfig,

    /// World directory and change log
    pub replication: ReplicationConfig,

    /// Peer call timeouts
    pub transport: TransportConfig,

    /// Managed game-server process
    pub workload: WorkloadConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Node identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address peers use to reach this node
    pub address: String,

    /// Interface the coordination API listens on
    pub bind_address: String,

    /// Port of the coordination HTTP API
    pub coordination_port: u16,

    /// Port the game server listens on
    pub workload_port: u16,

    /// Snapshot file for identity, membership and consensus state
    pub state_path: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            bind_address: "0.0.0.0".to_string(),
            coordination_port: 8080,
            workload_port: 8082,
            state_path: PathBuf::from("./worldsync-data/node.json"),
        }
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Primary: delay between two heartbeat rounds
    pub interval_ms: u64,

    /// Follower: delay before the primary is declared failed
    pub check_interval_ms: u64,

    /// Follower: re-arm the check timer whenever a heartbeat arrives
    pub reset_on_heartbeat: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            check_interval_ms: 5_000,
            reset_on_heartbeat: true,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Election back-off configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Base delay, scaled by a random factor in [0.5, 1.5)
    pub base_delay_ms: u64,

    /// Upper bound of the scaled delay
    pub max_delay_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            // 2^3 * 100
            base_delay_ms: 800,
            max_delay_ms: 13_000,
        }
    }
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Root of the replicated world directory
    pub world_dir: PathBuf,

    /// Persisted change log
    pub queue_path: PathBuf,

    /// File name never replicated (held open by the game server)
    pub lock_file: String,

    /// Read attempts for a changed file before the change is dropped
    pub read_attempts: usize,

    /// Delay between two read attempts
    pub read_retry_delay_ms: u64,

    /// Files fetched concurrently per catch-up batch
    pub recovery_batch_size: usize,

    /// Watch the world directory while primary
    pub watch: bool,

    /// Quiet period before a path's watch events are merged into one change
    pub watch_settle_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("./world"),
            queue_path: PathBuf::from("./worldsync-data/file_queue.json"),
            lock_file: "session.lock".to_string(),
            read_attempts: 3,
            read_retry_delay_ms: 1_000,
            recovery_batch_size: 10,
            watch: true,
            watch_settle_ms: 200,
        }
    }
}

impl ReplicationConfig {
    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }

    pub fn watch_settle(&self) -> Duration {
        Duration::from_millis(self.watch_settle_ms)
    }
}

/// Peer transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout for membership, vote and replication calls
    pub request_timeout_ms: u64,

    /// Timeout for heartbeat and info calls
    pub status_timeout_ms: u64,

    /// Largest accepted request body (world files travel inline)
    pub body_limit_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            status_timeout_ms: 4_000,
            body_limit_bytes: 500 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

/// Game-server process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Program started while this node is primary (none: nothing is spawned)
    pub command: Option<String>,

    /// Arguments passed to `command`
    pub args: Vec<String>,

    /// Working directory of the process (defaults to the world directory)
    pub working_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an optional TOML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the timers and batching cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_ms == 0 || self.heartbeat.check_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat intervals must be positive".into(),
            ));
        }
        if self.election.base_delay_ms > self.election.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "election base delay {}ms exceeds max delay {}ms",
                self.election.base_delay_ms, self.election.max_delay_ms
            )));
        }
        if self.replication.read_attempts == 0 {
            return Err(Error::InvalidConfig("read_attempts must be >= 1".into()));
        }
        if self.replication.recovery_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "recovery_batch_size must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node.coordination_port, 8080);
        assert_eq!(config.election.base_delay_ms, 800);
        assert_eq!(config.election.max_delay_ms, 13_000);
        assert_eq!(config.replication.recovery_batch_size, 10);
        assert_eq!(config.replication.lock_file, "session.lock");
        assert_eq!(config.transport.status_timeout(), Duration::from_secs(4));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[node]\ncoordination_port = 9100\n\n[heartbeat]\nreset_on_heartbeat = false\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.node.coordination_port, 9100);
        assert!(!config.heartbeat.reset_on_heartbeat);
        // Untouched sections keep their defaults
        assert_eq!(config.heartbeat.check_interval_ms, 5_000);
        assert_eq!(config.replication.read_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_bad_election() {
        let mut config = Config::default();
        config.election.base_delay_ms = 20_000;
        assert!(config.validate().is_err());
    }
}
