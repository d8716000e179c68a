//! Log catch-up against the primary
//!
//! The follower fetches the primary's queue, keeps the latest entry per path at or
//! after its own counter and pulls those files in fixed-size batches. Batches run
//! one after another; the files of a batch are fetched concurrently.

use crate::common::Result;
use crate::coordinator::cluster_view::Member;
use crate::coordinator::peer_client::PeerClient;
use crate::replication::{find_difference_queue, ReplicationEntry, ReplicationLog, WorldDir};
use futures_util::future::join_all;

/// What a catch-up run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Entries in the primary's queue
    pub tail_len: usize,
    /// Files written locally
    pub fetched: usize,
    /// Files the primary no longer has, removed locally
    pub removed: usize,
    /// Files that could not be fetched or written
    pub skipped: usize,
}

/// Bring `log` and `world` up to date with `primary`
pub async fn catch_up(
    client: &PeerClient,
    primary: &Member,
    log: &ReplicationLog,
    world: &WorldDir,
    batch_size: usize,
) -> Result<CatchUpReport> {
    let tail = client.request_file_log(primary).await?;
    let from_order = log.next_order();
    let missing = find_difference_queue(&tail, from_order);

    tracing::info!(
        "Catching up from {}: {} entries in primary log, {} files missing since order {}",
        primary.id,
        tail.len(),
        missing.len(),
        from_order
    );

    let mut report = CatchUpReport {
        tail_len: tail.len(),
        ..Default::default()
    };

    for batch in missing.chunks(batch_size.max(1)) {
        let fetches = batch.iter().map(|entry| async move {
            let result = client.missing_file(primary, &entry.file_path).await;
            (entry, result)
        });

        for (entry, result) in join_all(fetches).await {
            match land(world, entry, result).await {
                Ok(Landed::Written) => report.fetched += 1,
                Ok(Landed::Removed) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(
                        "Skipping {} (order {}): {}",
                        entry.file_path,
                        entry.order,
                        e
                    );
                    report.skipped += 1;
                    continue;
                }
            }
            log.advance_to(entry.order + 1);
        }
    }

    log.replace(tail).await?;

    tracing::info!(
        "Catch-up complete: {} fetched, {} removed, {} skipped, next order {}",
        report.fetched,
        report.removed,
        report.skipped,
        log.next_order()
    );
    Ok(report)
}

enum Landed {
    Written,
    Removed,
}

async fn land(
    world: &WorldDir,
    entry: &ReplicationEntry,
    fetched: Result<Option<Vec<u8>>>,
) -> Result<Landed> {
    match fetched {
        Ok(Some(content)) => {
            world.write(&entry.file_path, &content).await?;
            Ok(Landed::Written)
        }
        Ok(None) => {
            world.remove(&entry.file_path).await?;
            Ok(Landed::Removed)
        }
        Err(e) => Err(e),
    }
}
