use crate::consensus::ConsensusError;
use chainsync_primitives::{BlockNumber, SealedBlock, SealedHeader, H256};
use thiserror::Error;

/// Access to the local chain.
///
/// Storage and validation rules live behind this trait; the sync engines only read the chain
/// head, look up blocks, verify headers and insert new blocks.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait Chain: Send + Sync {
    /// Returns the number of the current chain head.
    fn current_height(&self) -> BlockNumber;

    /// Returns the header with the given hash.
    fn header_by_hash(&self, hash: H256) -> Option<SealedHeader>;

    /// Returns the canonical header with the given number.
    fn header_by_number(&self, number: BlockNumber) -> Option<SealedHeader>;

    /// Returns the block with the given hash.
    fn block_by_hash(&self, hash: H256) -> Option<SealedBlock>;

    /// Returns true if the block with the given hash is known locally.
    fn has_block(&self, hash: H256) -> bool {
        self.block_by_hash(hash).is_some()
    }

    /// Verifies the header against the consensus rules.
    fn verify_header(&self, header: &SealedHeader) -> Result<(), ConsensusError>;

    /// Inserts a batch of blocks, returning how many were imported.
    fn insert_chain(&self, blocks: Vec<SealedBlock>) -> Result<usize, InsertBlockError>;
}

/// Error returned when a batch of blocks could not be fully inserted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to insert block {hash} after {inserted} imported blocks: {kind}")]
pub struct InsertBlockError {
    /// Number of blocks of the batch that were imported before the failure.
    pub inserted: usize,
    /// Hash of the failing block.
    pub hash: H256,
    /// Cause of the failure.
    #[source]
    pub kind: InsertBlockErrorKind,
}

/// The cause of an [InsertBlockError].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InsertBlockErrorKind {
    /// Block failed verification.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// Block failed execution.
    #[error("Execution failed: {0}")]
    Execution(String),
    /// Block could not be persisted.
    #[error("Storage error: {0}")]
    Storage(String),
}
