use chainsync_primitives::{BlockNumber, PeerId, H256};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Result alias for result of a request.
pub type RequestResult<T> = Result<T, RequestError>;

/// Error variants that can happen when sending requests to a session.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum RequestError {
    #[error("Closed channel to the peer.")]
    ChannelClosed,
    #[error("Connection to a peer dropped while handling the request.")]
    ConnectionDropped,
    #[error("Capability Message is not supported by remote peer.")]
    UnsupportedCapability,
    #[error("Request timed out while awaiting response.")]
    Timeout,
    #[error("Received bad response.")]
    BadResponse,
}

// === impl RequestError ===

impl RequestError {
    /// Indicates whether this error is retryable or fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Timeout | RequestError::ConnectionDropped)
    }

    /// Whether the error happened because the channel was closed.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, RequestError::ChannelClosed)
    }
}

impl<T> From<mpsc::error::SendError<T>> for RequestError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        RequestError::ChannelClosed
    }
}

impl From<oneshot::error::RecvError> for RequestError {
    fn from(_: oneshot::error::RecvError) -> Self {
        RequestError::ChannelClosed
    }
}

/// The download result type
pub type DownloadResult<T> = Result<T, DownloadError>;

/// The downloader error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /* ==================== HEADER ERRORS ==================== */
    /// Received headers with less or more than the skeleton batch size.
    #[error("Received {received} headers for a skeleton batch. Expected {expected}.")]
    HeadersResponseTooShort {
        /// How many headers we received.
        received: u64,
        /// How many headers we expected.
        expected: u64,
    },
    /// Received a response to a request with unexpected start block
    #[error("Headers response starts at unexpected block: {received:?}. Expected {expected:?}.")]
    HeadersResponseStartBlockMismatch {
        /// The block number of the first received header
        received: BlockNumber,
        /// The block number the request started at
        expected: BlockNumber,
    },
    /// The last header of a batch does not match the skeleton checkpoint.
    #[error("Received invalid tip: {received:?}. Expected {expected:?}.")]
    InvalidTip {
        /// The hash of the received tip
        received: H256,
        /// The hash of the expected tip
        expected: H256,
    },
    /// Error when checking that the current header has the parent's hash as the parent_hash
    /// field, and that they have sequential block numbers.
    #[error("Headers did not match, current number: {header_number} / current hash: {header_hash}, parent number: {parent_number} / parent_hash: {parent_hash}")]
    MismatchedHeaders {
        /// The header number being evaluated
        header_number: BlockNumber,
        /// The header hash being evaluated
        header_hash: H256,
        /// The parent number being evaluated
        parent_number: BlockNumber,
        /// The parent hash being evaluated
        parent_hash: H256,
    },
    /* ==================== BODIES ERRORS ==================== */
    /// A delivered body does not match the roots of its header.
    #[error("Block body does not match header {hash} (#{number}).")]
    InvalidBody {
        /// Number of the block.
        number: BlockNumber,
        /// Hash of the block.
        hash: H256,
    },
    /// Delivered receipts do not match the roots of their header.
    #[error("Receipts do not match header {hash} (#{number}).")]
    InvalidReceipts {
        /// Number of the block.
        number: BlockNumber,
        /// Hash of the block.
        hash: H256,
    },
    /* ==================== COMMON ERRORS ==================== */
    /// A delivery arrived from a peer without an outstanding request.
    #[error("No fetches pending for peer {peer_id}.")]
    NoFetchesPending {
        /// The delivering peer.
        peer_id: PeerId,
    },
    /// A block landed outside of the result window.
    #[error("Retrieved hash chain is invalid.")]
    InvalidChain,
    /// Some of the delivered items were accepted before one failed.
    #[error("Partial failure after {accepted} accepted items: {source}")]
    PartialFailure {
        /// Number of accepted items.
        accepted: usize,
        /// The failure that stopped the assembly.
        #[source]
        source: Box<DownloadError>,
    },
    /// None of the delivered items were usable.
    #[error("Stale delivery.")]
    StaleDelivery,
    /// Error while executing the request.
    #[error(transparent)]
    RequestError(#[from] RequestError),
}

impl DownloadError {
    /// Returns true if this error rejected a skeleton header batch.
    pub fn is_skeleton_rejection(&self) -> bool {
        matches!(
            self,
            DownloadError::HeadersResponseTooShort { .. } |
                DownloadError::HeadersResponseStartBlockMismatch { .. } |
                DownloadError::InvalidTip { .. } |
                DownloadError::MismatchedHeaders { .. }
        )
    }

    /// Returns the number of items accepted despite this error.
    pub fn accepted(&self) -> usize {
        match self {
            DownloadError::PartialFailure { accepted, .. } => *accepted,
            _ => 0,
        }
    }
}
