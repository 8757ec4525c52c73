use crate::queue::{DownloadQueue, FetchRequest, HeaderReservation};
use chainsync_interfaces::p2p::{
    downloader::DownloadClient, error::DownloadResult, peer::PeerSession,
};
use chainsync_primitives::{BlockHashOrNumber, PeerId};
use futures::future::join_all;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{debug, trace, warn};

/// Number of bodies or receipts requested from a single peer at once.
pub const DEFAULT_REQUEST_LIMIT: usize = 128;

/// Outcome of handing out one round of work to the idle peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchRound {
    /// Requests that were sent.
    pub dispatched: usize,
    /// Whether results became ready without a request.
    pub progress: bool,
    /// Whether the result window prevented handing out more work.
    pub throttled: bool,
}

/// Hands out download queue work to peers and cleans up after unresponsive ones.
#[derive(Debug)]
pub struct QueueDriver<D> {
    queue: DownloadQueue,
    client: D,
    request_limit: usize,
}

impl<D> QueueDriver<D>
where
    D: DownloadClient,
{
    /// Creates a new driver for the queue, dropping peers through `client`.
    pub fn new(queue: DownloadQueue, client: D) -> Self {
        Self { queue, client, request_limit: DEFAULT_REQUEST_LIMIT }
    }

    /// Set the number of items requested from a single peer.
    pub fn with_request_limit(mut self, request_limit: usize) -> Self {
        self.request_limit = request_limit.max(1);
        self
    }

    /// The driven queue.
    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// Reserves a skeleton batch for every idle peer and sends the header requests.
    pub async fn fetch_headers(&self, peers: &[Arc<dyn PeerSession>]) -> FetchRound {
        let mut round = FetchRound::default();
        let mut requests = Vec::new();
        for peer in peers {
            match self.queue.reserve_headers(peer) {
                HeaderReservation::Reserved(request) => requests.push(request),
                HeaderReservation::Throttled => round.throttled = true,
                HeaderReservation::Nothing => {}
            }
        }

        let amount = self.queue.max_header_fetch() as u64;
        let sent = join_all(requests.iter().map(|request| {
            request.peer.request_headers(BlockHashOrNumber::Number(request.from), amount, 0, false)
        }))
        .await;

        for (request, outcome) in requests.iter().zip(sent) {
            match outcome {
                Ok(()) => round.dispatched += 1,
                Err(error) => {
                    debug!(target: "downloaders::queue", peer_id = %request.peer_id(), from = request.from, %error, "Failed to send header request");
                    self.queue.cancel_headers(request);
                }
            }
        }
        round
    }

    /// Reserves bodies for every idle peer and sends the body requests.
    ///
    /// A request that could not be sent is returned to the queue.
    pub async fn fetch_bodies(&self, peers: &[Arc<dyn PeerSession>]) -> DownloadResult<FetchRound> {
        let mut round = FetchRound { throttled: self.queue.should_throttle_blocks(), ..Default::default() };
        let mut requests = Vec::new();
        for peer in peers {
            let reservation = self.queue.reserve_bodies(peer, self.request_limit)?;
            round.progress |= reservation.progress;
            requests.extend(reservation.request);
        }

        let sent = join_all(
            requests.iter().map(|request| request.peer.request_bodies(request.hashes())),
        )
        .await;
        round.dispatched = self.settle(&requests, sent, |request| self.queue.cancel_bodies(request));
        Ok(round)
    }

    /// Reserves receipts for every idle peer and sends the receipt requests.
    ///
    /// A request that could not be sent is returned to the queue.
    pub async fn fetch_receipts(
        &self,
        peers: &[Arc<dyn PeerSession>],
    ) -> DownloadResult<FetchRound> {
        let mut round =
            FetchRound { throttled: self.queue.should_throttle_receipts(), ..Default::default() };
        let mut requests = Vec::new();
        for peer in peers {
            let reservation = self.queue.reserve_receipts(peer, self.request_limit)?;
            round.progress |= reservation.progress;
            requests.extend(reservation.request);
        }

        let sent = join_all(
            requests.iter().map(|request| request.peer.request_receipts(request.hashes())),
        )
        .await;
        round.dispatched =
            self.settle(&requests, sent, |request| self.queue.cancel_receipts(request));
        Ok(round)
    }

    fn settle<E: std::fmt::Display>(
        &self,
        requests: &[FetchRequest],
        sent: Vec<Result<(), E>>,
        cancel: impl Fn(&FetchRequest),
    ) -> usize {
        let mut dispatched = 0;
        for (request, outcome) in requests.iter().zip(sent) {
            match outcome {
                Ok(()) => {
                    trace!(target: "downloaders::queue", peer_id = %request.peer_id(), count = request.headers.len(), "Sent request");
                    dispatched += 1;
                }
                Err(error) => {
                    debug!(target: "downloaders::queue", peer_id = %request.peer_id(), %error, "Failed to send request");
                    cancel(request);
                }
            }
        }
        dispatched
    }

    /// Expires every request older than `timeout` and drops the peers that did not answer in
    /// time.
    ///
    /// Returns the dropped peers.
    pub fn expire(&self, timeout: Duration) -> Vec<PeerId> {
        let mut dropped = HashSet::new();
        let expired = [
            self.queue.expire_headers(timeout),
            self.queue.expire_bodies(timeout),
            self.queue.expire_receipts(timeout),
        ];
        for (peer_id, failed) in expired.into_iter().flatten() {
            if dropped.insert(peer_id.clone()) {
                warn!(target: "downloaders::queue", %peer_id, failed, "Request timed out, dropping peer");
                self.client.drop_peer(&peer_id);
                self.queue.revoke(&peer_id);
            }
        }
        dropped.into_iter().collect()
    }
}
