use chainsync_interfaces::p2p::peer::PeerSession;
use chainsync_primitives::{BlockNumber, PeerId, SealedBlock, SealedHeader, H256};
use std::sync::Arc;
use tokio::time::Instant;

/// A peer's claim that a block exists.
#[derive(Debug, Clone)]
pub(crate) struct Announce {
    /// Hash of the announced block.
    pub(crate) hash: H256,
    /// Announced number, `0` if unknown.
    pub(crate) number: BlockNumber,
    /// The header, once it was fetched.
    pub(crate) header: Option<SealedHeader>,
    /// When the announcement arrived or the last request for it was sent.
    pub(crate) time: Instant,
    /// The announcing peer, used to request the header and the body.
    pub(crate) peer: Arc<dyn PeerSession>,
}

impl Announce {
    pub(crate) fn new(
        peer: Arc<dyn PeerSession>,
        hash: H256,
        number: BlockNumber,
        time: Instant,
    ) -> Self {
        Self { hash, number, header: None, time, peer }
    }

    pub(crate) fn origin(&self) -> &PeerId {
        self.peer.peer_id()
    }
}

/// A complete block waiting in the import queue.
#[derive(Debug, Clone)]
pub(crate) struct QueuedBlock {
    /// The peer that delivered the block.
    pub(crate) origin: PeerId,
    pub(crate) block: SealedBlock,
    /// When the block, or its last missing part, arrived.
    pub(crate) received: Instant,
}
