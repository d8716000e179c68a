//! File-change replication
//!
//! The primary turns every mutation of the world directory into a numbered
//! [`ReplicationEntry`] and pushes it to live followers. A follower that missed
//! entries pulls the primary's log tail and the missing files on restart.

pub mod catch_up;
pub mod log;
pub mod watcher;
pub mod world;

pub use catch_up::{catch_up, CatchUpReport};
pub use log::{find_difference_queue, ChangeKind, ReplicationEntry, ReplicationLog};
pub use watcher::{LocalChange, WorldWatcher};
pub use world::WorldDir;
