use crate::p2p::{
    error::{RequestError, RequestResult},
    peer::PeerSession,
};
use async_trait::async_trait;
use chainsync_primitives::{BlockHashOrNumber, BlockNumber, PeerId, H256};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;

/// A request recorded by a [TestPeer].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRequest {
    /// A header batch request.
    Headers {
        /// First block of the batch.
        origin: BlockHashOrNumber,
        /// Number of requested headers.
        amount: u64,
        /// Headers skipped between two returned ones.
        skip: u64,
        /// Whether the batch walks towards genesis.
        reverse: bool,
    },
    /// A single header request.
    OneHeader {
        /// Requested hash.
        hash: H256,
        /// Announced number.
        number: BlockNumber,
    },
    /// A body request.
    Bodies(Vec<H256>),
    /// A receipt request.
    Receipts(Vec<H256>),
}

/// A [PeerSession] that records every request it is asked to send.
#[derive(Debug)]
pub struct TestPeer {
    id: PeerId,
    lacking: Mutex<HashSet<H256>>,
    requests: Mutex<Vec<PeerRequest>>,
    listener: Option<mpsc::UnboundedSender<PeerRequest>>,
    fail_requests: AtomicBool,
}

impl TestPeer {
    /// Creates a new test peer.
    pub fn new(id: impl Into<PeerId>) -> Self {
        Self {
            id: id.into(),
            lacking: Default::default(),
            requests: Default::default(),
            listener: None,
            fail_requests: AtomicBool::new(false),
        }
    }

    /// Creates a new test peer that also streams every request it sends.
    pub fn with_listener(id: impl Into<PeerId>) -> (Self, mpsc::UnboundedReceiver<PeerRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peer = Self::new(id);
        peer.listener = Some(tx);
        (peer, rx)
    }

    /// Makes every following request fail with [RequestError::ConnectionDropped].
    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    /// Returns all requests sent so far.
    pub fn requests(&self) -> Vec<PeerRequest> {
        self.requests.lock().clone()
    }

    fn record(&self, request: PeerRequest) -> RequestResult<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(RequestError::ConnectionDropped)
        }
        if let Some(listener) = &self.listener {
            let _ = listener.send(request.clone());
        }
        self.requests.lock().push(request);
        Ok(())
    }
}

#[async_trait]
impl PeerSession for TestPeer {
    fn peer_id(&self) -> &PeerId {
        &self.id
    }

    async fn request_headers(
        &self,
        origin: BlockHashOrNumber,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> RequestResult<()> {
        self.record(PeerRequest::Headers { origin, amount, skip, reverse })
    }

    async fn request_one_header(&self, hash: H256, number: BlockNumber) -> RequestResult<()> {
        self.record(PeerRequest::OneHeader { hash, number })
    }

    async fn request_bodies(&self, hashes: Vec<H256>) -> RequestResult<()> {
        self.record(PeerRequest::Bodies(hashes))
    }

    async fn request_receipts(&self, hashes: Vec<H256>) -> RequestResult<()> {
        self.record(PeerRequest::Receipts(hashes))
    }

    fn mark_lacking(&self, hash: H256) {
        self.lacking.lock().insert(hash);
    }

    fn lacks(&self, hash: &H256) -> bool {
        self.lacking.lock().contains(hash)
    }
}
