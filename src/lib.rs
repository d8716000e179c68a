//! # worldsync
//!
//! Keeps one game-world directory replicated across a small cluster of peers:
//! - Leader election with randomized back-off
//! - Heartbeat failure detection
//! - Membership propagated by the primary
//! - Ordered file-change log with catch-up recovery
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Primary node                  │
//! │  - runs the game server                  │
//! │  - watches the world directory           │
//! │  - numbers every change, pushes it out   │
//! └───────────┬──────────────────────────────┘
//!             │ HTTP/JSON (heartbeat, file-change, update-network)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Follower 1 │   │ Follower 2 │   │ Follower 3   │
//! │ world copy │   │ world copy │   │ world copy   │
//! │ + queue    │   │ + queue    │   │ + queue      │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! worldsync-node serve \
//!   --address 10.0.0.1 \
//!   --port 8080 \
//!   --world-dir ./world \
//!   --state ./worldsync-data/node.json
//! ```
//!
//! ### Drive it from the front-end CLI
//! ```bash
//! worldsync --node http://localhost:8080 create --username alice
//! worldsync --node http://localhost:8081 join 10.0.0.1:8080 --username bob
//! worldsync --node http://localhost:8081 status
//! worldsync --node http://localhost:8081 leave
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;
pub mod replication;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{CoordinationNode, NodeServer, RunningNode};
pub use replication::{ReplicationEntry, ReplicationLog};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
