use crate::{
    chain::{Chain, InsertBlockError, InsertBlockErrorKind},
    consensus::ConsensusError,
    p2p::{broadcast::BlockBroadcaster, downloader::DownloadClient},
};
use chainsync_primitives::{BlockNumber, PeerId, SealedBlock, SealedHeader, H256};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct ChainState {
    blocks: HashMap<H256, SealedBlock>,
    canonical: BTreeMap<BlockNumber, H256>,
    height: BlockNumber,
}

/// An in-memory [Chain] with a configurable verification outcome.
#[derive(Debug, Default)]
pub struct TestChain {
    state: Mutex<ChainState>,
    verify_error: Mutex<Option<ConsensusError>>,
    insert_error: Mutex<Option<InsertBlockErrorKind>>,
    inserted: Mutex<Vec<H256>>,
}

impl TestChain {
    /// Creates a chain containing the given blocks, the last one being the head.
    pub fn with_blocks(blocks: impl IntoIterator<Item = SealedBlock>) -> Self {
        let chain = Self::default();
        {
            let mut state = chain.state.lock();
            for block in blocks {
                state.height = state.height.max(block.number);
                state.canonical.insert(block.number, block.hash());
                state.blocks.insert(block.hash(), block);
            }
        }
        chain
    }

    /// Makes every following header verification fail with the given error.
    pub fn set_verify_error(&self, error: Option<ConsensusError>) {
        *self.verify_error.lock() = error;
    }

    /// Makes every following insertion fail with the given error.
    pub fn set_insert_error(&self, error: Option<InsertBlockErrorKind>) {
        *self.insert_error.lock() = error;
    }

    /// Hashes of the blocks inserted through [Chain::insert_chain], in insertion order.
    pub fn inserted(&self) -> Vec<H256> {
        self.inserted.lock().clone()
    }
}

impl Chain for TestChain {
    fn current_height(&self) -> BlockNumber {
        self.state.lock().height
    }

    fn header_by_hash(&self, hash: H256) -> Option<SealedHeader> {
        self.state.lock().blocks.get(&hash).map(|block| block.header.clone())
    }

    fn header_by_number(&self, number: BlockNumber) -> Option<SealedHeader> {
        let state = self.state.lock();
        let hash = state.canonical.get(&number)?;
        state.blocks.get(hash).map(|block| block.header.clone())
    }

    fn block_by_hash(&self, hash: H256) -> Option<SealedBlock> {
        self.state.lock().blocks.get(&hash).cloned()
    }

    fn verify_header(&self, _header: &SealedHeader) -> Result<(), ConsensusError> {
        match self.verify_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn insert_chain(&self, blocks: Vec<SealedBlock>) -> Result<usize, InsertBlockError> {
        let mut inserted = 0;
        for block in blocks {
            if let Some(kind) = self.insert_error.lock().clone() {
                return Err(InsertBlockError { inserted, hash: block.hash(), kind })
            }
            let mut state = self.state.lock();
            state.height = state.height.max(block.number);
            state.canonical.insert(block.number, block.hash());
            self.inserted.lock().push(block.hash());
            state.blocks.insert(block.hash(), block);
            inserted += 1;
        }
        Ok(inserted)
    }
}

/// A [BlockBroadcaster] that streams every broadcast to a channel.
#[derive(Debug)]
pub struct TestBroadcaster {
    tx: mpsc::UnboundedSender<(H256, bool)>,
}

impl TestBroadcaster {
    /// Creates the broadcaster and the receiving end of its `(hash, propagate_full)` stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(H256, bool)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BlockBroadcaster for TestBroadcaster {
    fn broadcast_block(&self, block: SealedBlock, propagate_full: bool) {
        let _ = self.tx.send((block.hash(), propagate_full));
    }
}

/// A [DownloadClient] that records dropped peers.
#[derive(Debug, Default)]
pub struct TestDownloadClient {
    dropped: Mutex<Vec<PeerId>>,
    connected: usize,
}

impl TestDownloadClient {
    /// Creates a client reporting the given number of connected peers.
    pub fn new(connected: usize) -> Self {
        Self { dropped: Default::default(), connected }
    }

    /// Peers dropped so far.
    pub fn dropped(&self) -> Vec<PeerId> {
        self.dropped.lock().clone()
    }
}

impl DownloadClient for TestDownloadClient {
    fn drop_peer(&self, peer_id: &PeerId) {
        self.dropped.lock().push(peer_id.clone());
    }

    fn num_connected_peers(&self) -> usize {
        self.connected
    }
}
