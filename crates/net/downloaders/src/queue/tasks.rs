use super::request::FetchRequest;
use chainsync_primitives::{BlockNumber, PeerId, SealedHeader, H256};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
};

/// Headers waiting for one of their parts, popped lowest block number first.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    /// All scheduled headers that were not completed yet, including the reserved ones.
    pool: HashMap<H256, SealedHeader>,
    queue: BinaryHeap<Reverse<(BlockNumber, H256)>>,
}

impl TaskQueue {
    /// Adds a new task.
    pub(crate) fn schedule(&mut self, header: SealedHeader) {
        self.queue.push(Reverse((header.number, header.hash())));
        self.pool.insert(header.hash(), header);
    }

    /// Puts a reserved task back into the queue.
    pub(crate) fn requeue(&mut self, header: &SealedHeader) {
        if self.pool.contains_key(&header.hash()) {
            self.queue.push(Reverse((header.number, header.hash())));
        }
    }

    /// Pops the task with the lowest block number.
    pub(crate) fn pop(&mut self) -> Option<SealedHeader> {
        while let Some(Reverse((_, hash))) = self.queue.pop() {
            // completed while the entry was still queued
            if let Some(header) = self.pool.get(&hash) {
                return Some(header.clone())
            }
        }
        None
    }

    /// Marks the task as completed.
    pub(crate) fn complete(&mut self, hash: &H256) {
        self.pool.remove(hash);
    }

    pub(crate) fn contains(&self, hash: &H256) -> bool {
        self.pool.contains_key(hash)
    }

    /// Number of queued, not reserved, tasks.
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// State of one block part (bodies or receipts).
#[derive(Debug, Default)]
pub(crate) struct PartQueue {
    pub(crate) tasks: TaskQueue,
    /// At most one outstanding request per peer.
    pub(crate) pending: HashMap<PeerId, FetchRequest>,
    /// Hashes whose part arrived and whose result was not consumed yet.
    pub(crate) done: HashSet<H256>,
}

impl PartQueue {
    /// Returns the headers of a request back to the task queue.
    pub(crate) fn requeue_request(&mut self, request: &FetchRequest) {
        for header in &request.headers {
            self.tasks.requeue(header);
        }
    }
}

/// The block parts collected after the header chain is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Part {
    Bodies,
    Receipts,
}

impl std::fmt::Display for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Part::Bodies => f.write_str("bodies"),
            Part::Receipts => f.write_str("receipts"),
        }
    }
}
