use chainsync_interfaces::p2p::peer::PeerSession;
use chainsync_primitives::{
    BlockBody, CurrencyBlock, CurrencyReceipts, Header, PeerId, SealedBlock, SealedHeader, H256,
};
use std::{sync::Arc, time::Instant};

/// A data retrieval request handed out to a single peer.
///
/// Header requests carry the skeleton index in `from` and no headers; body and receipt requests
/// carry the headers whose parts were requested, in request order.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Peer the request is sent to.
    pub peer: Arc<dyn PeerSession>,
    /// First block of a skeleton batch.
    pub from: u64,
    /// Headers whose bodies or receipts are requested.
    pub headers: Vec<SealedHeader>,
    /// When the request was reserved.
    pub time: Instant,
}

impl FetchRequest {
    pub(crate) fn headers(peer: Arc<dyn PeerSession>, from: u64) -> Self {
        Self { peer, from, headers: Vec::new(), time: Instant::now() }
    }

    pub(crate) fn parts(peer: Arc<dyn PeerSession>, headers: Vec<SealedHeader>) -> Self {
        Self { peer, from: 0, headers, time: Instant::now() }
    }

    /// Id of the peer the request belongs to.
    pub fn peer_id(&self) -> &PeerId {
        self.peer.peer_id()
    }

    /// Hashes of the requested headers.
    pub fn hashes(&self) -> Vec<H256> {
        self.headers.iter().map(SealedHeader::hash).collect()
    }
}

/// Outcome of [`DownloadQueue::reserve_headers`](crate::queue::DownloadQueue::reserve_headers).
#[derive(Debug)]
pub enum HeaderReservation {
    /// A skeleton batch was reserved for the peer.
    Reserved(FetchRequest),
    /// The next batch would land outside of the result window; retry once results were consumed.
    Throttled,
    /// Nothing to hand out to this peer.
    Nothing,
}

impl HeaderReservation {
    /// Returns the reserved request, if any.
    pub fn into_request(self) -> Option<FetchRequest> {
        match self {
            HeaderReservation::Reserved(request) => Some(request),
            _ => None,
        }
    }
}

/// Outcome of a body or receipt reservation.
#[derive(Debug, Default)]
pub struct Reservation {
    /// The request to send, `None` if nothing was reserved for the peer.
    pub request: Option<FetchRequest>,
    /// Whether parts without content were resolved in place, making results ready.
    pub progress: bool,
}

/// One slot of the result window: a block whose parts are still being collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Number of parts still missing. The result is ready at zero.
    pub(crate) pending: usize,
    /// Hash of the header.
    pub hash: H256,
    /// The scheduled header.
    pub header: SealedHeader,
    /// Uncles of the block.
    pub uncles: Vec<Header>,
    /// Per-currency transactions of the block.
    pub transactions: Vec<CurrencyBlock>,
    /// Per-currency receipts of the block, only collected in fast sync.
    pub receipts: Vec<CurrencyReceipts>,
}

impl FetchResult {
    pub(crate) fn new(header: SealedHeader, components: usize) -> Self {
        Self {
            pending: components,
            hash: header.hash(),
            header,
            uncles: Vec::new(),
            transactions: Vec::new(),
            receipts: Vec::new(),
        }
    }

    /// Returns true if every part of the block arrived.
    pub fn is_ready(&self) -> bool {
        self.pending == 0
    }

    pub(crate) fn resolve_part(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    /// Approximate in-memory size, fed into the block size average.
    pub fn size(&self) -> usize {
        self.header.size() +
            self.uncles.iter().map(Header::size).sum::<usize>() +
            self.transactions.iter().map(CurrencyBlock::size).sum::<usize>() +
            self.receipts.iter().map(CurrencyReceipts::size).sum::<usize>()
    }

    /// Assembles the block, dropping the receipts.
    pub fn into_block(self) -> SealedBlock {
        SealedBlock::new(
            self.header,
            BlockBody { transactions: self.transactions, uncles: self.uncles },
        )
    }
}
