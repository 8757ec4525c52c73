use chainsync_primitives::{BlockNumber, H256};
use thiserror::Error;

/// Header verification errors returned by the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The block timestamp lies in the future.
    ///
    /// Such a block is not invalid, it just cannot be processed yet.
    #[error("Block {number} is from the future: timestamp {timestamp} > now {present}.")]
    FutureBlock {
        /// Number of the block.
        number: BlockNumber,
        /// Timestamp of the block.
        timestamp: u64,
        /// Local time at verification.
        present: u64,
    },
    /// The parent of the header is not known.
    #[error("Parent {parent_hash} of block {number} is unknown.")]
    UnknownAncestor {
        /// Number of the block.
        number: BlockNumber,
        /// Hash of the missing parent.
        parent_hash: H256,
    },
    /// The header seal is invalid.
    #[error("Block {hash} has an invalid seal.")]
    InvalidSeal {
        /// Hash of the block.
        hash: H256,
    },
    /// Any other header rule violation.
    #[error("Block {hash} failed verification: {reason}.")]
    InvalidHeader {
        /// Hash of the block.
        hash: H256,
        /// Violated rule.
        reason: String,
    },
}

impl ConsensusError {
    /// Whether the header was rejected only because it is ahead of local time.
    pub fn is_future_block(&self) -> bool {
        matches!(self, ConsensusError::FutureBlock { .. })
    }
}
