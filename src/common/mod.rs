//! Common utilities and types shared across worldsync

pub mod config;
pub mod error;
pub mod utils;

pub use config::{
    Config, ElectionConfig, HeartbeatConfig, NodeConfig, ReplicationConfig, TransportConfig,
    WorkloadConfig,
};
pub use error::{Error, Result};
pub use utils::{
    content_digest, decode_content, encode_content, format_bytes, normalize_base_url, retry_fixed,
};
