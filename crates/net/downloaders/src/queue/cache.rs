use super::request::{FetchRequest, FetchResult};
use chainsync_primitives::{BlockNumber, PeerId, H256};
use std::collections::{HashMap, HashSet};

/// The result window: blocks `offset..offset + capacity`, delivered strictly in order.
#[derive(Debug)]
pub(crate) struct ResultCache {
    slots: Vec<Option<FetchResult>>,
    /// Number of the block in the first slot. Never decreases.
    offset: BlockNumber,
    /// Exponential moving average of the consumed block sizes.
    size: f64,
    memory_limit: usize,
    size_weight: f64,
}

impl ResultCache {
    pub(crate) fn new(capacity: usize, memory_limit: usize, size_weight: f64) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            offset: 0,
            size: 0.0,
            memory_limit,
            size_weight,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn offset(&self) -> BlockNumber {
        self.offset
    }

    pub(crate) fn raise_offset(&mut self, offset: BlockNumber) {
        self.offset = self.offset.max(offset);
    }

    /// Clears all slots and rewinds the window to block zero.
    pub(crate) fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.offset = 0;
    }

    /// Slot index of the given block, `None` outside of the window.
    pub(crate) fn index_of(&self, number: BlockNumber) -> Option<usize> {
        let index = number.checked_sub(self.offset)?;
        usize::try_from(index).ok().filter(|index| *index < self.slots.len())
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Option<FetchResult> {
        &mut self.slots[index]
    }

    /// Number of slots the memory budget allows, given the current block size estimate.
    fn limit(&self) -> usize {
        let capacity = self.slots.len();
        if capacity as f64 * self.size > self.memory_limit as f64 {
            ((self.memory_limit as f64 + self.size - 1.0) / self.size) as usize
        } else {
            capacity
        }
    }

    /// Free slots for a part: the window limit minus the slots at the head that already hold the
    /// part, minus the headers in flight that fall inside the window.
    pub(crate) fn free_slots(
        &self,
        pending: &HashMap<PeerId, FetchRequest>,
        done: &HashSet<H256>,
    ) -> usize {
        let limit = self.limit().min(self.slots.len());
        let finished = self.slots[..limit]
            .iter()
            .map_while(Option::as_ref)
            .filter(|result| done.contains(&result.hash))
            .count();
        let window_end = self.offset.saturating_add(limit as u64);
        let in_flight = pending
            .values()
            .flat_map(|request| request.headers.iter())
            .filter(|header| header.number < window_end)
            .count();
        limit.saturating_sub(finished).saturating_sub(in_flight)
    }

    /// Length of the prefix of completed slots.
    pub(crate) fn ready(&self) -> usize {
        self.slots
            .iter()
            .position(|slot| !slot.as_ref().map_or(false, FetchResult::is_ready))
            .unwrap_or(self.slots.len())
    }

    /// Removes the first `count` slots, shifting the window forward by exactly `count` blocks.
    pub(crate) fn take(&mut self, count: usize) -> Vec<FetchResult> {
        let capacity = self.slots.len();
        let results: Vec<FetchResult> = self.slots.drain(..count).flatten().collect();
        self.slots.resize_with(capacity, || None);
        self.offset += count as u64;

        for result in &results {
            self.size =
                self.size_weight * result.size() as f64 + (1.0 - self.size_weight) * self.size;
        }
        results
    }
}
