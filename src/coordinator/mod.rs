//! Cluster coordination
//!
//! Every node runs the same coordinator:
//! - Membership (join, leave, list propagation)
//! - Leader election with randomized back-off
//! - Heartbeat failure detection
//! - Startup recovery against the current primary

pub mod broadcast;
pub mod cluster_view;
pub mod consensus;
pub mod heartbeat;
pub mod http;
pub mod membership;
pub mod node;
pub mod peer_client;
pub mod protocol;
pub mod recovery;
pub mod server;
pub mod state_store;
pub mod workload;

pub use cluster_view::{ClusterView, Member, NodeIdentity};
pub use consensus::{ConsensusEngine, ConsensusState, RaftRole};
pub use node::CoordinationNode;
pub use peer_client::PeerClient;
pub use recovery::RecoveryOutcome;
pub use server::{NodeServer, RunningNode};
