use chainsync_interfaces::sync::{SyncProgress, SyncState, SyncStateProvider, SyncStateUpdater};
use chainsync_primitives::BlockNumber;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
struct StatusInner {
    state: SyncState,
    progress: SyncProgress,
}

/// Tracks the state and progress of the bulk sync.
///
/// The progress of the last sync is kept after it finished, so it can still be reported.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    inner: Arc<RwLock<StatusInner>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusInner {
                state: SyncState::Idle,
                progress: SyncProgress::default(),
            })),
        }
    }
}

impl SyncStatus {
    /// Creates a tracker in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a sync from `starting_block` towards `highest_block`.
    pub fn start(&self, starting_block: BlockNumber, highest_block: BlockNumber) {
        let mut inner = self.inner.write();
        inner.state = SyncState::Syncing;
        inner.progress =
            SyncProgress { starting_block, current_block: starting_block, highest_block };
    }

    /// Records the latest block the sync has reached.
    pub fn advance(&self, current_block: BlockNumber) {
        let mut inner = self.inner.write();
        inner.progress.current_block = inner.progress.current_block.max(current_block);
        inner.progress.highest_block = inner.progress.highest_block.max(current_block);
    }

    /// Raises the sync target.
    pub fn update_highest(&self, highest_block: BlockNumber) {
        let mut inner = self.inner.write();
        inner.progress.highest_block = inner.progress.highest_block.max(highest_block);
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.inner.read().state
    }
}

impl SyncStateProvider for SyncStatus {
    fn is_syncing(&self) -> bool {
        self.inner.read().state.is_syncing()
    }

    fn sync_progress(&self) -> SyncProgress {
        self.inner.read().progress
    }
}

impl SyncStateUpdater for SyncStatus {
    fn update_sync_state(&self, state: SyncState) {
        self.inner.write().state = state;
    }
}
