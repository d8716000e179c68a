//! Node snapshot on stable storage
//!
//! Loaded once at boot, written after every membership, consensus or role change.
//! The file is plain JSON without versioning; anything unreadable is treated as
//! "never joined a cluster".

use crate::common::Result;
use crate::coordinator::cluster_view::Member;
use crate::coordinator::consensus::ConsensusState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a node needs to come back after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    #[serde(rename = "mainPort")]
    pub coordination_port: u16,
    #[serde(rename = "minecraftPort")]
    pub workload_port: u16,
    pub address: String,
    #[serde(rename = "isPrimaryNode")]
    pub is_primary: bool,
    pub in_network: bool,
    #[serde(rename = "uuid")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "networkNodes")]
    pub members: Vec<Member>,
    #[serde(rename = "primaryNode")]
    pub primary: Option<Member>,
    #[serde(rename = "selfNode")]
    pub self_member: Member,
    pub alive: bool,
    #[serde(rename = "raftSave")]
    pub consensus: ConsensusState,
}

/// JSON snapshot file
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. Missing or malformed files yield `None`.
    pub fn load(&self) -> Option<NodeSnapshot> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No saved state at {}, starting fresh", self.path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}, starting fresh", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(
                    "Saved state {} is malformed: {}, starting fresh",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Write a snapshot produced by `snapshot`.
    ///
    /// The closure runs after the write lock is taken, so concurrent saves land in
    /// the order their snapshots were taken.
    pub async fn save_with<F>(&self, snapshot: F) -> Result<()>
    where
        F: FnOnce() -> NodeSnapshot,
    {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&snapshot())?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
