//! Coordination node
//!
//! `CoordinationNode` is the aggregate every handler and timer goes through. Its
//! identity, view and consensus state sit behind one mutex that is only held for
//! short, synchronous critical sections; every network or disk call works on a
//! snapshot taken out of the lock.
//!
//! Membership, heartbeat and recovery flows live in their own modules as further
//! `impl CoordinationNode` blocks.

use crate::common::{content_digest, encode_content, format_bytes, Config, Error, Result};
use crate::coordinator::broadcast::{broadcast, log_outcomes};
use crate::coordinator::cluster_view::{ClusterView, Member, NodeIdentity};
use crate::coordinator::consensus::{ConsensusEngine, ConsensusState, RaftRole};
use crate::coordinator::heartbeat::Routines;
use crate::coordinator::peer_client::PeerClient;
use crate::coordinator::protocol::{
    FileChange, MissingFileResponse, NodeInfo, VoteRequest, VoteResponse,
};
use crate::coordinator::state_store::{NodeSnapshot, StateStore};
use crate::coordinator::workload::Workload;
use crate::replication::{
    ChangeKind, LocalChange, ReplicationEntry, ReplicationLog, WorldDir, WorldWatcher,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Mutable node state, guarded by a single lock
#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) identity: NodeIdentity,
    pub(crate) in_network: bool,
    pub(crate) view: ClusterView,
    pub(crate) consensus: ConsensusEngine,
}

impl NodeState {
    pub(crate) fn self_id(&self) -> &str {
        self.identity.id.as_deref().unwrap_or_default()
    }

    pub(crate) fn is_primary(&self) -> bool {
        match (self.view.primary(), self.identity.id.as_deref()) {
            (Some(primary), Some(id)) => self.in_network && primary.id == id,
            _ => false,
        }
    }

    pub(crate) fn self_member(&self) -> Member {
        self.identity
            .id
            .as_deref()
            .and_then(|id| self.view.get(id))
            .cloned()
            .unwrap_or_else(|| self.identity.to_member(false))
    }

    /// Live members other than this node
    pub(crate) fn live_peers(&self) -> Vec<Member> {
        self.view.live_others(self.self_id())
    }
}

struct WatchHandle {
    _watcher: WorldWatcher,
    consumer: JoinHandle<()>,
}

pub(crate) struct NodeInner {
    pub(crate) config: Config,
    pub(crate) state: Mutex<NodeState>,
    pub(crate) client: PeerClient,
    pub(crate) store: StateStore,
    pub(crate) log: ReplicationLog,
    pub(crate) world: WorldDir,
    pub(crate) routines: Mutex<Routines>,
    pub(crate) workload: Workload,
    watch: Mutex<Option<WatchHandle>>,
    restored: bool,
    started_at: DateTime<Utc>,
}

/// A cluster member: consensus participant and replication endpoint
#[derive(Clone)]
pub struct CoordinationNode {
    pub(crate) inner: Arc<NodeInner>,
}

impl std::fmt::Debug for CoordinationNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("CoordinationNode")
            .field("id", &state.identity.id)
            .field("in_network", &state.in_network)
            .field("role", &state.consensus.role())
            .field("members", &state.view.len())
            .finish()
    }
}

impl CoordinationNode {
    /// Build a node, restoring identity, view and consensus state from the snapshot
    /// file when one exists
    pub fn new(config: Config) -> Result<Self> {
        let client = PeerClient::new(&config.transport)?;
        let store = StateStore::new(&config.node.state_path);
        let world = WorldDir::open(&config.replication.world_dir)?;
        let log = ReplicationLog::open(&config.replication.queue_path)?;
        let workload = Workload::new(config.workload.clone(), world.root());

        let mut identity = NodeIdentity::new(
            config.node.address.clone(),
            config.node.coordination_port,
            config.node.workload_port,
        );

        let snapshot = store.load();
        let restored = snapshot.as_ref().map_or(false, |s| s.in_network);
        let state = match snapshot {
            Some(snapshot) if snapshot.in_network => {
                identity.id = snapshot.id;
                identity.username = snapshot.username;
                let mut view = ClusterView::new(snapshot.members);
                // Our own address and ports may have changed since the snapshot
                if let Some(id) = identity.id.as_deref() {
                    if let Some(me) = view.get_mut(id) {
                        me.address = identity.address.clone();
                        me.coordination_port = identity.coordination_port;
                        me.workload_port = identity.workload_port;
                        me.alive = true;
                    }
                }
                tracing::info!(
                    "Restored node {} (term {}, {} members)",
                    identity.id.as_deref().unwrap_or("?"),
                    snapshot.consensus.current_term,
                    view.len()
                );
                NodeState {
                    identity,
                    in_network: true,
                    view,
                    consensus: ConsensusEngine::restore(snapshot.consensus),
                }
            }
            _ => NodeState {
                identity,
                in_network: false,
                view: ClusterView::default(),
                consensus: ConsensusEngine::new(),
            },
        };

        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                state: Mutex::new(state),
                client,
                store,
                log,
                world,
                routines: Mutex::new(Routines::default()),
                workload,
                watch: Mutex::new(None),
                restored,
                started_at: Utc::now(),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn client(&self) -> &PeerClient {
        &self.inner.client
    }

    pub fn log(&self) -> &ReplicationLog {
        &self.inner.log
    }

    pub fn world(&self) -> &WorldDir {
        &self.inner.world
    }

    /// True when the node came back from a snapshot naming a cluster
    pub fn was_restored(&self) -> bool {
        self.inner.restored
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, NodeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // === Read accessors ===

    pub fn id(&self) -> Option<String> {
        self.state().identity.id.clone()
    }

    pub fn in_network(&self) -> bool {
        self.state().in_network
    }

    pub fn is_primary(&self) -> bool {
        self.state().is_primary()
    }

    pub fn self_member(&self) -> Member {
        self.state().self_member()
    }

    pub fn members(&self) -> Vec<Member> {
        self.state().view.to_vec()
    }

    pub fn primary(&self) -> Option<Member> {
        self.state().view.primary().cloned()
    }

    pub fn term(&self) -> u64 {
        self.state().consensus.term()
    }

    pub fn role(&self) -> RaftRole {
        self.state().consensus.role()
    }

    pub fn consensus_state(&self) -> ConsensusState {
        self.state().consensus.save_file()
    }

    pub fn info(&self) -> NodeInfo {
        let state = self.state();
        NodeInfo {
            node: state.self_member(),
            network: state.view.to_vec(),
            primary: state.view.primary().cloned(),
            raft_state: state.consensus.save_file(),
            in_network: state.in_network,
            started_at: self.inner.started_at,
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.state();
        NodeSnapshot {
            coordination_port: state.identity.coordination_port,
            workload_port: state.identity.workload_port,
            address: state.identity.address.clone(),
            is_primary: state.is_primary(),
            in_network: state.in_network,
            id: state.identity.id.clone(),
            username: state.identity.username.clone(),
            members: state.view.to_vec(),
            primary: state.view.primary().cloned(),
            self_member: state.self_member(),
            alive: true,
            consensus: state.consensus.save_file(),
        }
    }

    /// Write the current state to the snapshot file
    pub async fn persist(&self) -> Result<()> {
        self.inner.store.save_with(|| self.snapshot()).await
    }

    /// Persist, logging instead of failing the caller
    pub(crate) async fn persist_or_warn(&self) {
        if let Err(e) = self.persist().await {
            tracing::error!(
                "Failed to persist node state to {}: {}",
                self.inner.store.path().display(),
                e
            );
        }
    }

    // === Votes ===

    /// Answer a vote request; the decision is persisted before replying
    pub async fn handle_request_vote(&self, request: VoteRequest) -> VoteResponse {
        let (granted, term) = {
            let mut state = self.state();
            let granted = state
                .consensus
                .request_vote(request.term, &request.candidate_id);
            (granted, state.consensus.term())
        };

        if granted {
            tracing::info!(
                "Granted vote to {} for term {}",
                request.candidate_id,
                request.term
            );
            self.persist_or_warn().await;
            // Someone else is running; wait for its takeover instead of racing it
            self.clear_election_timeout();
            self.arm_check_timer();
        } else {
            tracing::info!(
                "Denied vote to {} for term {} (current term {})",
                request.candidate_id,
                request.term,
                term
            );
        }

        VoteResponse {
            term,
            vote_granted: granted,
        }
    }

    // === Replication ===

    /// Turn a local mutation into a log entry and push it to live peers.
    ///
    /// Returns `None` when the change was dropped: this node is not primary or the
    /// file could not be read.
    pub async fn record_local_change(&self, change: LocalChange) -> Result<Option<ReplicationEntry>> {
        if !self.is_primary() {
            tracing::debug!("Ignoring local change to {}: not primary", change.file_path);
            return Ok(None);
        }

        let replication = &self.inner.config.replication;
        let content = match change.kind {
            ChangeKind::Unlink => Vec::new(),
            ChangeKind::Add | ChangeKind::Change => match self
                .inner
                .world
                .read_with_retry(
                    &change.file_path,
                    replication.read_attempts,
                    replication.read_retry_delay(),
                )
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Dropping {} of {}: {}", change.kind, change.file_path, e);
                    return Ok(None);
                }
            },
        };

        let entry = self.inner.log.append(&change.file_path).await?;
        let message = FileChange {
            event: change.kind,
            file_path: entry.file_path.clone(),
            file_content: encode_content(&content),
            order: entry.order,
        };

        let peers = self.state().live_peers();
        tracing::debug!(
            "Replicating {} {} ({}, order {}) to {} peers",
            message.event,
            message.file_path,
            format_bytes(content.len() as u64),
            message.order,
            peers.len()
        );
        let client = &self.inner.client;
        let message = &message;
        let outcomes = broadcast(peers, |peer| async move {
            client.file_change(&peer, message).await
        })
        .await;
        log_outcomes("file-change", &outcomes);

        Ok(Some(entry))
    }

    /// Apply a change pushed by the primary.
    ///
    /// A node that is itself primary refuses: its watcher would record the write
    /// as a local change and push it straight back.
    pub async fn apply_file_change(&self, change: FileChange) -> Result<()> {
        if self.is_primary() {
            tracing::warn!(
                "Refusing pushed {} of {} (order {}): this node is primary",
                change.event,
                change.file_path,
                change.order
            );
            return Err(Error::PrimaryConflict);
        }

        let world = &self.inner.world;
        match change.event {
            ChangeKind::Add | ChangeKind::Change => {
                let content = crate::common::decode_content(&change.file_content)?;
                world.write(&change.file_path, &content).await?;
            }
            ChangeKind::Unlink => world.remove(&change.file_path).await?,
        }

        self.inner
            .log
            .apply_remote(ReplicationEntry {
                order: change.order,
                file_path: change.file_path.clone(),
            })
            .await?;

        tracing::debug!(
            "Applied {} {} (order {})",
            change.event,
            change.file_path,
            change.order
        );
        Ok(())
    }

    pub fn file_log(&self) -> Vec<ReplicationEntry> {
        self.inner.log.entries()
    }

    /// Current content of a replicated file
    pub async fn missing_file(&self, file_path: &str) -> Result<MissingFileResponse> {
        let content = self.inner.world.read(file_path).await?;
        Ok(MissingFileResponse {
            content: encode_content(&content),
            blake3: content_digest(&content),
        })
    }

    // === Primary-only side effects ===

    /// Start the workload and the world watch
    pub(crate) fn start_primary_duties(&self) {
        if let Err(e) = self.inner.workload.start() {
            tracing::error!("{}", e);
        }
        if let Err(e) = self.start_watch() {
            tracing::error!("Failed to watch the world directory: {}", e);
        }
    }

    pub(crate) fn stop_primary_duties(&self) {
        self.inner.workload.stop();
        self.stop_watch();
    }

    fn start_watch(&self) -> Result<()> {
        if !self.inner.config.replication.watch {
            return Ok(());
        }
        let mut watch = self.watch_slot();
        if watch.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel(1024);
        let watcher = WorldWatcher::start(
            &self.inner.world,
            &self.inner.config.replication.lock_file,
            self.inner.config.replication.watch_settle(),
            tx,
        )?;

        let weak: Weak<NodeInner> = Arc::downgrade(&self.inner);
        let consumer = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let node = CoordinationNode { inner };
                if let Err(e) = node.record_local_change(change).await {
                    tracing::error!("Failed to record local change: {}", e);
                }
            }
        });

        *watch = Some(WatchHandle {
            _watcher: watcher,
            consumer,
        });
        Ok(())
    }

    fn stop_watch(&self) {
        if let Some(handle) = self.watch_slot().take() {
            handle.consumer.abort();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch_slot().is_some()
    }

    fn watch_slot(&self) -> MutexGuard<'_, Option<WatchHandle>> {
        self.inner
            .watch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop timers, watch and workload. State on disk is left as is.
    pub fn shutdown(&self) {
        self.routines().cancel_all();
        self.stop_primary_duties();
        tracing::info!("Node {} shut down", self.id().unwrap_or_default());
    }

    pub(crate) fn require_primary(&self) -> Result<()> {
        let state = self.state();
        if !state.in_network {
            return Err(Error::NotInCluster);
        }
        if state.is_primary() {
            return Ok(());
        }
        match state.view.primary() {
            Some(primary) => Err(Error::NotPrimary(primary.base_url())),
            None => Err(Error::NoPrimary),
        }
    }
}
