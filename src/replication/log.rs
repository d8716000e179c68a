//! Ordered file-change log
//!
//! Every mutation of the world directory gets the next order number and is appended
//! to an in-memory queue that is written to disk after each append. Orders are never
//! reused: on reopen the last persisted order + 1 seeds the counter.
//!
//! On disk the queue is a JSON array of `{ "order": n, "filePath": "..." }`.

use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Kind of file mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "add"),
            ChangeKind::Change => write!(f, "change"),
            ChangeKind::Unlink => write!(f, "unlink"),
        }
    }
}

/// Log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationEntry {
    pub order: u64,
    pub file_path: String,
}

#[derive(Debug)]
struct LogState {
    entries: Vec<ReplicationEntry>,
    next_order: u64,
}

impl LogState {
    fn seeded(entries: Vec<ReplicationEntry>) -> Self {
        let next_order = entries.last().map(|e| e.order + 1).unwrap_or(1);
        Self {
            entries,
            next_order,
        }
    }
}

/// Replication log
#[derive(Debug)]
pub struct ReplicationLog {
    path: PathBuf,
    state: Mutex<LogState>,
    // Serializes queue writes so the last write carries the latest queue
    write_lock: tokio::sync::Mutex<()>,
}

impl ReplicationLog {
    /// Open or create the queue file.
    /// A missing or unreadable queue starts an empty log at order 1.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = Self::load(&path);
        let state = LogState::seeded(entries);
        tracing::info!(
            "Replication log loaded: {} entries, next order {}",
            state.entries.len(),
            state.next_order
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn load(path: &Path) -> Vec<ReplicationEntry> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read replication log {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<Vec<ReplicationEntry>>(&bytes) {
            Ok(mut entries) => {
                entries.sort_by_key(|e| e.order);
                entries
            }
            Err(e) => {
                tracing::warn!("Replication log {} is corrupted: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Append a local mutation and persist the queue.
    /// Returns the entry with its assigned order.
    pub async fn append(&self, file_path: &str) -> Result<ReplicationEntry> {
        let entry = {
            let mut state = self.lock();
            let entry = ReplicationEntry {
                order: state.next_order,
                file_path: file_path.to_string(),
            };
            state.next_order += 1;
            state.entries.push(entry.clone());
            entry
        };

        self.persist().await?;
        Ok(entry)
    }

    /// Append an entry received from the primary, keeping its order
    pub async fn apply_remote(&self, entry: ReplicationEntry) -> Result<()> {
        {
            let mut state = self.lock();
            state.next_order = state.next_order.max(entry.order + 1);
            state.entries.push(entry);
        }
        self.persist().await
    }

    /// Move the counter forward to `order` (never backwards)
    pub fn advance_to(&self, order: u64) {
        let mut state = self.lock();
        state.next_order = state.next_order.max(order);
    }

    /// Replace the queue with an authoritative tail and persist it
    pub async fn replace(&self, entries: Vec<ReplicationEntry>) -> Result<()> {
        {
            let mut state = self.lock();
            let seeded = LogState::seeded(entries);
            state.next_order = state.next_order.max(seeded.next_order);
            state.entries = seeded.entries;
        }
        self.persist().await
    }

    /// Copy of the queue
    pub fn entries(&self) -> Vec<ReplicationEntry> {
        self.lock().entries.clone()
    }

    /// Order the next local mutation will get
    pub fn next_order(&self) -> u64 {
        self.lock().next_order
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Write the queue to disk (temp file + rename)
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let entries = self.entries();
        let bytes = serde_json::to_vec_pretty(&entries)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Entries still missing locally: orders at or after `from_order`, latest order per
/// path only, sorted ascending by order.
pub fn find_difference_queue(tail: &[ReplicationEntry], from_order: u64) -> Vec<ReplicationEntry> {
    let mut latest: HashMap<&str, u64> = HashMap::new();
    for entry in tail.iter().filter(|e| e.order >= from_order) {
        let order = latest.entry(entry.file_path.as_str()).or_insert(entry.order);
        if entry.order > *order {
            *order = entry.order;
        }
    }

    let mut missing: Vec<ReplicationEntry> = latest
        .into_iter()
        .map(|(file_path, order)| ReplicationEntry {
            order,
            file_path: file_path.to_string(),
        })
        .collect();
    missing.sort_by_key(|e| e.order);
    missing
}
