//! The glue between the download queue and the rest of the node.
//!
//! A node keeps up with the network in two ways: a bulk sync through the [`DownloadQueue`]
//! whenever a peer is far ahead, and the announcement driven fetcher for the last few blocks.
//!
//! [`DownloadQueue`]: crate::queue::DownloadQueue

use chainsync_primitives::BlockNumber;

mod driver;
mod status;

pub use driver::{FetchRound, QueueDriver, DEFAULT_REQUEST_LIMIT};
pub use status::SyncStatus;

/// How the node catches up with a remote head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Download the missing range through the download queue.
    BulkSync,
    /// The gap is small enough for announcements to close it.
    Fetcher,
}

/// Picks the strategy for reaching `remote` from `local`.
///
/// Anything further ahead than the fetcher is willing to queue is bulk synced.
pub fn choose_strategy(
    local: BlockNumber,
    remote: BlockNumber,
    max_queue_dist: u64,
) -> SyncStrategy {
    if remote > local.saturating_add(max_queue_dist) {
        SyncStrategy::BulkSync
    } else {
        SyncStrategy::Fetcher
    }
}
