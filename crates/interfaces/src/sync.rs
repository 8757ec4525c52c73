//! Traits used when interacting with the sync status of the node.

use chainsync_primitives::BlockNumber;

/// Which block parts a bulk sync downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Download headers and bodies, execute every block.
    #[default]
    Full,
    /// Download headers, bodies and receipts.
    Fast,
}

impl SyncMode {
    /// Number of block parts that must arrive before a block is complete.
    pub const fn components(&self) -> usize {
        match self {
            SyncMode::Full => 1,
            SyncMode::Fast => 2,
        }
    }

    /// Whether receipts are downloaded in this mode.
    pub const fn fetches_receipts(&self) -> bool {
        matches!(self, SyncMode::Fast)
    }
}

/// The state the node is currently in when it comes to synchronization.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum SyncState {
    /// Bulk sync is not running.
    ///
    /// New blocks only arrive through announcements.
    Idle,
    /// A bulk sync against a peer is in progress.
    Syncing,
}

impl SyncState {
    /// Whether the node is currently bulk syncing.
    pub fn is_syncing(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// Progress of the current or last bulk sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncProgress {
    /// Block number the sync started at.
    pub starting_block: BlockNumber,
    /// Block number the sync has reached.
    pub current_block: BlockNumber,
    /// Highest block number announced by the sync target.
    pub highest_block: BlockNumber,
}

/// A type that provides information about whether the node is currently syncing.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait SyncStateProvider: Send + Sync {
    /// Returns `true` if the node is undergoing a bulk sync.
    fn is_syncing(&self) -> bool;

    /// Returns the progress of the current or last bulk sync.
    fn sync_progress(&self) -> SyncProgress;
}

/// An updater for the [SyncState] of the node.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait SyncStateUpdater: SyncStateProvider {
    /// Notifies about a [SyncState] update.
    fn update_sync_state(&self, state: SyncState);
}

/// A [SyncStateUpdater] implementation that does nothing.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct NoopSyncStateUpdate;

impl SyncStateProvider for NoopSyncStateUpdate {
    fn is_syncing(&self) -> bool {
        false
    }

    fn sync_progress(&self) -> SyncProgress {
        SyncProgress::default()
    }
}

impl SyncStateUpdater for NoopSyncStateUpdate {
    fn update_sync_state(&self, _state: SyncState) {}
}
