//! Watches the world directory for local mutations
//!
//! Raw `notify` events are mapped to [`ChangeKind`]s and forwarded to the node as
//! [`LocalChange`]s on a tokio channel. Events seen before the watch is fully set
//! up are dropped, as is anything touching the game server's lock file.
//!
//! A single write usually yields several events (create, then one or more
//! modifies). Events for one path are merged until the path has been quiet for
//! the settle period, so each write becomes one change.

use crate::common::{Error, Result};
use crate::replication::{ChangeKind, WorldDir};
use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One mutation of the world directory, path relative to the world root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    pub kind: ChangeKind,
    pub file_path: String,
}

/// Running watch; dropping it stops the watch
pub struct WorldWatcher {
    _watcher: RecommendedWatcher,
    coalescer: JoinHandle<()>,
    ready: Arc<AtomicBool>,
    root: PathBuf,
}

impl std::fmt::Debug for WorldWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldWatcher")
            .field("root", &self.root)
            .field("ready", &self.ready.load(Ordering::SeqCst))
            .finish()
    }
}

impl WorldWatcher {
    /// Start watching `world` recursively. Must be called within a tokio runtime.
    pub fn start(
        world: &WorldDir,
        lock_file: &str,
        settle: Duration,
        tx: mpsc::Sender<LocalChange>,
    ) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel(1024);
        let ready = Arc::new(AtomicBool::new(false));
        let gate = ready.clone();
        let world_cb = world.clone();
        let lock_file = lock_file.to_string();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("World watch error: {}", e);
                        return;
                    }
                };
                if !gate.load(Ordering::SeqCst) {
                    return;
                }
                for (kind, path) in classify(&event) {
                    if is_lock_file(&path, &lock_file) {
                        continue;
                    }
                    if kind != ChangeKind::Unlink && path.is_dir() {
                        continue;
                    }
                    let file_path = match world_cb.relative(&path) {
                        Ok(file_path) => file_path,
                        Err(e) => {
                            tracing::debug!("Ignoring change outside the world: {}", e);
                            continue;
                        }
                    };
                    if raw_tx.blocking_send(LocalChange { kind, file_path }).is_err() {
                        return;
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| Error::Internal(format!("failed to create world watcher: {}", e)))?;

        watcher
            .watch(world.root(), RecursiveMode::Recursive)
            .map_err(|e| {
                Error::Internal(format!(
                    "failed to watch {}: {}",
                    world.root().display(),
                    e
                ))
            })?;

        let coalescer = tokio::spawn(coalesce(raw_rx, tx, settle));
        ready.store(true, Ordering::SeqCst);
        tracing::info!("Watching world directory {}", world.root().display());

        Ok(Self {
            _watcher: watcher,
            coalescer,
            ready,
            root: world.root().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for WorldWatcher {
    fn drop(&mut self) {
        self.ready.store(false, Ordering::SeqCst);
        self.coalescer.abort();
        tracing::info!("Stopped watching {}", self.root.display());
    }
}

/// Forward changes once their path has been quiet for `settle`, one per path
async fn coalesce(
    mut raw: mpsc::Receiver<LocalChange>,
    tx: mpsc::Sender<LocalChange>,
    settle: Duration,
) {
    // First-seen order, each with the instant it becomes due
    let mut pending: Vec<(LocalChange, Instant)> = Vec::new();

    loop {
        let next_due = pending.iter().map(|(_, due)| *due).min();
        tokio::select! {
            received = raw.recv() => match received {
                Some(change) => merge(&mut pending, change, Instant::now() + settle),
                None => break,
            },
            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let (due, waiting): (Vec<_>, Vec<_>) =
                    pending.drain(..).partition(|(_, due)| *due <= now);
                pending = waiting;
                for (change, _) in due {
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    for (change, _) in pending {
        if tx.send(change).await.is_err() {
            return;
        }
    }
}

fn merge(pending: &mut Vec<(LocalChange, Instant)>, change: LocalChange, due: Instant) {
    match pending
        .iter_mut()
        .find(|(queued, _)| queued.file_path == change.file_path)
    {
        Some((queued, deadline)) => {
            queued.kind = merge_kind(queued.kind, change.kind);
            *deadline = due;
        }
        None => pending.push((change, due)),
    }
}

/// A file created and then written is still new; otherwise the latest event wins
fn merge_kind(earlier: ChangeKind, later: ChangeKind) -> ChangeKind {
    match (earlier, later) {
        (ChangeKind::Add, ChangeKind::Change) => ChangeKind::Add,
        (_, later) => later,
    }
}

/// Map a raw event onto replicated change kinds
fn classify(event: &Event) -> Vec<(ChangeKind, PathBuf)> {
    let all = |kind: ChangeKind| -> Vec<(ChangeKind, PathBuf)> {
        event.paths.iter().map(|p| (kind, p.clone())).collect()
    };

    match &event.kind {
        EventKind::Create(_) => all(ChangeKind::Add),
        // Only files are replicated; their own events cover a removed directory
        EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Remove(_) => all(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first() {
                changes.push((ChangeKind::Unlink, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((ChangeKind::Add, to.clone()));
            }
            changes
        }
        EventKind::Modify(_) => all(ChangeKind::Change),
        _ => Vec::new(),
    }
}

fn is_lock_file(path: &Path, lock_file: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy() == lock_file)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use std::time::Duration;
    use tempfile::tempdir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_classify() {
        let created = event(EventKind::Create(CreateKind::File), &["/w/a"]);
        assert_eq!(classify(&created), vec![(ChangeKind::Add, PathBuf::from("/w/a"))]);

        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/w/a"],
        );
        assert_eq!(classify(&written)[0].0, ChangeKind::Change);

        let removed = event(EventKind::Remove(RemoveKind::File), &["/w/a"]);
        assert_eq!(classify(&removed)[0].0, ChangeKind::Unlink);

        let removed_dir = event(EventKind::Remove(RemoveKind::Folder), &["/w/region"]);
        assert!(classify(&removed_dir).is_empty());

        let touched = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
            &["/w/a"],
        );
        assert!(classify(&touched).is_empty());

        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/a", "/w/b"],
        );
        assert_eq!(
            classify(&renamed),
            vec![
                (ChangeKind::Unlink, PathBuf::from("/w/a")),
                (ChangeKind::Add, PathBuf::from("/w/b")),
            ]
        );
    }

    #[test]
    fn test_lock_file_skipped() {
        assert!(is_lock_file(Path::new("/w/world/session.lock"), "session.lock"));
        assert!(!is_lock_file(Path::new("/w/world/level.dat"), "session.lock"));
    }

    fn local(kind: ChangeKind, path: &str) -> LocalChange {
        LocalChange {
            kind,
            file_path: path.to_string(),
        }
    }

    #[test]
    fn test_merge_kind() {
        assert_eq!(merge_kind(ChangeKind::Add, ChangeKind::Change), ChangeKind::Add);
        assert_eq!(merge_kind(ChangeKind::Add, ChangeKind::Unlink), ChangeKind::Unlink);
        assert_eq!(merge_kind(ChangeKind::Unlink, ChangeKind::Add), ChangeKind::Add);
        assert_eq!(merge_kind(ChangeKind::Change, ChangeKind::Change), ChangeKind::Change);
    }

    #[tokio::test]
    async fn test_coalesce_one_change_per_path() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(coalesce(raw_rx, tx, Duration::from_secs(60)));

        raw_tx.send(local(ChangeKind::Add, "a.dat")).await.unwrap();
        raw_tx.send(local(ChangeKind::Change, "a.dat")).await.unwrap();
        raw_tx.send(local(ChangeKind::Change, "b.dat")).await.unwrap();
        raw_tx.send(local(ChangeKind::Change, "a.dat")).await.unwrap();
        // Closing the source flushes what is still settling
        drop(raw_tx);
        task.await.unwrap();

        assert_eq!(rx.recv().await, Some(local(ChangeKind::Add, "a.dat")));
        assert_eq!(rx.recv().await, Some(local(ChangeKind::Change, "b.dat")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_coalesce_emits_after_quiet_period() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(coalesce(raw_rx, tx, Duration::from_millis(20)));

        raw_tx.send(local(ChangeKind::Add, "level.dat")).await.unwrap();
        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(change, Some(local(ChangeKind::Add, "level.dat")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_reports_new_file_once() {
        let dir = tempdir().unwrap();
        let world = WorldDir::open(dir.path()).unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _watcher =
            WorldWatcher::start(&world, "session.lock", Duration::from_millis(50), tx).unwrap();

        tokio::fs::write(dir.path().join("session.lock"), b"lock").await.unwrap();
        tokio::fs::write(dir.path().join("level.dat"), b"level").await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let change = rx.recv().await.unwrap();
                if change.file_path == "level.dat" {
                    return change;
                }
                assert_ne!(change.file_path, "session.lock");
            }
        })
        .await
        .unwrap();
        assert_eq!(change.kind, ChangeKind::Add);

        // Create and modify of one write were merged
        let again = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(again.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_removed_directory_yields_file_unlinks_only() {
        let dir = tempdir().unwrap();
        let world = WorldDir::open(dir.path()).unwrap();
        world.write("region/r.0.0.mca", b"chunk").await.unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let _watcher =
            WorldWatcher::start(&world, "session.lock", Duration::from_millis(50), tx).unwrap();
        tokio::fs::remove_dir_all(dir.path().join("region")).await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, local(ChangeKind::Unlink, "region/r.0.0.mca"));

        let again = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(again.is_err());
    }
}
