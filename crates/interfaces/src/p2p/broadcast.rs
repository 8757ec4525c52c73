use chainsync_primitives::SealedBlock;

/// Propagates blocks to connected peers.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait BlockBroadcaster: Send + Sync {
    /// Broadcasts the block.
    ///
    /// With `propagate_full` the whole block is sent to a subset of peers, otherwise only the
    /// hash is announced.
    fn broadcast_block(&self, block: SealedBlock, propagate_full: bool);
}
