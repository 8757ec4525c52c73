use super::error::RequestResult;
use async_trait::async_trait;
use chainsync_primitives::{BlockHashOrNumber, BlockNumber, PeerId, H256};
use std::fmt::Debug;

/// A single peer connection as seen by the sync engines.
///
/// Requests are fire-and-forget: a successful return only means the request left the node.
/// Responses arrive asynchronously and are routed to the download queue deliveries or the
/// fetcher filters by the networking layer.
#[async_trait]
pub trait PeerSession: Send + Sync + Debug {
    /// The id of the remote peer.
    fn peer_id(&self) -> &PeerId;

    /// Requests a batch of headers starting at `origin`.
    async fn request_headers(
        &self,
        origin: BlockHashOrNumber,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> RequestResult<()>;

    /// Requests a single header by hash.
    async fn request_one_header(&self, hash: H256, number: BlockNumber) -> RequestResult<()>;

    /// Requests the bodies of the given blocks.
    async fn request_bodies(&self, hashes: Vec<H256>) -> RequestResult<()>;

    /// Requests the receipts of the given blocks.
    async fn request_receipts(&self, hashes: Vec<H256>) -> RequestResult<()>;

    /// Records that the peer is known not to have the given item.
    fn mark_lacking(&self, hash: H256);

    /// Returns true if the peer is known not to have the given item.
    fn lacks(&self, hash: &H256) -> bool;
}
