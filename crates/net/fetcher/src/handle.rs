use crate::{
    announce::Announce,
    error::{FetcherError, FetcherResult},
};
use chainsync_interfaces::p2p::peer::PeerSession;
use chainsync_primitives::{BlockBody, BlockNumber, PeerId, SealedBlock, SealedHeader, H256};
use chainsync_tasks::shutdown::Shutdown;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

/// Commands sent from a [`FetcherHandle`] to the [`Fetcher`](crate::Fetcher).
#[derive(Debug)]
pub(crate) enum FetcherCommand {
    /// A peer announced a block.
    Notify(Announce),
    /// A peer propagated a whole block.
    Inject { origin: PeerId, block: SealedBlock },
    /// Headers arrived, extract those requested by the fetcher.
    FilterHeaders {
        peer_id: PeerId,
        headers: Vec<SealedHeader>,
        time: Instant,
        tx: oneshot::Sender<Vec<SealedHeader>>,
    },
    /// Bodies arrived, extract those requested by the fetcher.
    FilterBodies {
        peer_id: PeerId,
        bodies: Vec<BlockBody>,
        time: Instant,
        tx: oneshot::Sender<Vec<BlockBody>>,
    },
}

/// Front-end of the [`Fetcher`](crate::Fetcher), used by the networking layer.
///
/// Every call gives up once the fetcher's shutdown signal fired.
#[derive(Debug, Clone)]
pub struct FetcherHandle {
    /// Sender half of the command channel.
    to_service: mpsc::UnboundedSender<FetcherCommand>,
    /// Fires when the fetcher stops.
    shutdown: Shutdown,
}

// === impl FetcherHandle ===

impl FetcherHandle {
    pub(crate) fn new(
        to_service: mpsc::UnboundedSender<FetcherCommand>,
        shutdown: Shutdown,
    ) -> Self {
        Self { to_service, shutdown }
    }

    fn send(&self, cmd: FetcherCommand) -> FetcherResult<()> {
        if self.shutdown.is_fired() {
            return Err(FetcherError::Terminated)
        }
        self.to_service.send(cmd).map_err(|_| FetcherError::Terminated)
    }

    /// Announces the potential availability of a new block, to be requested from `peer`.
    ///
    /// `number` is `0` if the peer did not tell.
    pub fn notify(
        &self,
        peer: Arc<dyn PeerSession>,
        hash: H256,
        number: BlockNumber,
        time: Instant,
    ) -> FetcherResult<()> {
        self.send(FetcherCommand::Notify(Announce::new(peer, hash, number, time)))
    }

    /// Queues a block propagated by a peer for import.
    pub fn enqueue(&self, origin: PeerId, block: SealedBlock) -> FetcherResult<()> {
        self.send(FetcherCommand::Inject { origin, block })
    }

    /// Extracts the headers explicitly requested by the fetcher, returning all others.
    ///
    /// Returns nothing once the fetcher terminated.
    pub async fn filter_headers(
        &self,
        peer_id: PeerId,
        headers: Vec<SealedHeader>,
        time: Instant,
    ) -> Vec<SealedHeader> {
        let (tx, rx) = oneshot::channel();
        if self.send(FetcherCommand::FilterHeaders { peer_id, headers, time, tx }).is_err() {
            return Vec::new()
        }
        self.response(rx).await
    }

    /// Extracts the bodies explicitly requested by the fetcher, returning all others.
    ///
    /// Returns nothing once the fetcher terminated.
    pub async fn filter_bodies(
        &self,
        peer_id: PeerId,
        bodies: Vec<BlockBody>,
        time: Instant,
    ) -> Vec<BlockBody> {
        let (tx, rx) = oneshot::channel();
        if self.send(FetcherCommand::FilterBodies { peer_id, bodies, time, tx }).is_err() {
            return Vec::new()
        }
        self.response(rx).await
    }

    async fn response<T>(&self, rx: oneshot::Receiver<Vec<T>>) -> Vec<T> {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            res = rx => res.unwrap_or_default(),
            _ = shutdown => Vec::new(),
        }
    }
}
