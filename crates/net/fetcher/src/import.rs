//! Importing a single fetched block into the local chain.

use crate::{announce::QueuedBlock, metrics::FetcherMetrics};
use chainsync_interfaces::{
    chain::{Chain, InsertBlockError},
    consensus::ConsensusError,
    p2p::{broadcast::BlockBroadcaster, downloader::DownloadClient},
};
use tracing::debug;

/// How a block import ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImportOutcome {
    /// The parent is not known locally.
    UnknownParent,
    /// The header failed verification and the delivering peer was dropped.
    Rejected(ConsensusError),
    /// The chain refused the block.
    Failed(InsertBlockError),
    /// The block is part of the chain now.
    Imported {
        /// Whether the block was propagated in full before the import.
        propagated: bool,
    },
}

/// Verifies and inserts the block, propagating it to the network on the way.
///
/// A block passing header verification is sent in full to a subset of peers before the
/// import; a block from the future is imported without being propagated. Once imported,
/// the block's hash is announced to everyone.
pub(crate) fn import_block<C, B, D>(
    chain: &C,
    broadcaster: &B,
    client: &D,
    metrics: &FetcherMetrics,
    queued: QueuedBlock,
) -> ImportOutcome
where
    C: Chain + ?Sized,
    B: BlockBroadcaster + ?Sized,
    D: DownloadClient + ?Sized,
{
    let QueuedBlock { origin, block, received } = queued;
    let hash = block.hash();
    let number = block.number();

    if !chain.has_block(block.parent_hash) {
        debug!(target: "sync::import", peer_id = %origin, number, ?hash, parent = ?block.parent_hash, "Unknown parent of propagated block");
        return ImportOutcome::UnknownParent
    }

    let propagated = match chain.verify_header(&block.header) {
        Ok(()) => {
            metrics.broadcast_out_duration.record(received.elapsed().as_secs_f64());
            broadcaster.broadcast_block(block.clone(), true);
            true
        }
        Err(err) if err.is_future_block() => false,
        Err(err) => {
            debug!(target: "sync::import", peer_id = %origin, number, ?hash, %err, "Propagated block verification failed");
            client.drop_peer(&origin);
            return ImportOutcome::Rejected(err)
        }
    };

    if let Err(err) = chain.insert_chain(vec![block.clone()]) {
        debug!(target: "sync::import", peer_id = %origin, number, ?hash, %err, "Propagated block import failed");
        return ImportOutcome::Failed(err)
    }

    metrics.announce_out_duration.record(received.elapsed().as_secs_f64());
    broadcaster.broadcast_block(block, false);
    debug!(target: "sync::import", peer_id = %origin, number, ?hash, "Imported propagated block");
    ImportOutcome::Imported { propagated }
}
