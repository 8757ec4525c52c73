//! The download queue: turns a linear range of block numbers into complete blocks fetched from
//! many peers in parallel, and hands them out strictly in ascending, gap-free order.
//!
//! Headers are filled in between the checkpoints of a skeleton chain in batches of
//! `max_header_fetch`. Once a contiguous header chain is [scheduled](DownloadQueue::schedule), the
//! bodies (and in fast sync the receipts) of every header are reserved by peers, delivered back
//! and assembled into a fixed-size result window. [`DownloadQueue::results`] drains the ready
//! prefix of that window.

use chainsync_interfaces::{
    p2p::{
        error::{DownloadError, DownloadResult},
        peer::PeerSession,
    },
    sync::SyncMode,
};
use chainsync_primitives::{BlockBody, CurrencyReceipts, PeerId, SealedHeader, H256};
use chainsync_tracing::throttle;
use parking_lot::{Condvar, Mutex};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

mod cache;
mod metrics;
mod request;
mod tasks;

pub use self::metrics::QueueMetrics;
pub use request::{FetchRequest, FetchResult, HeaderReservation, Reservation};

use cache::ResultCache;
use tasks::{Part, PartQueue};

/// Number of headers requested to fill one skeleton gap.
pub const MAX_HEADER_FETCH: usize = 192;

/// Maximum number of blocks held in the result window.
pub const BLOCK_CACHE_ITEMS: usize = 1200;

/// Approximate memory budget of the result window.
pub const BLOCK_CACHE_MEMORY: usize = 64 * 1024 * 1024;

/// Weight of the latest block in the block size average.
pub const BLOCK_CACHE_SIZE_WEIGHT: f64 = 0.1;

/// Maximum number of results handed out by a single [`DownloadQueue::results`] call.
pub const MAX_RESULTS_PROCESS: usize = 2048;

/// State of the skeleton header fill.
#[derive(Debug, Default)]
struct HeaderFill {
    /// Skeleton headers keyed by the first block number of the batch ending in them.
    task_pool: HashMap<u64, SealedHeader>,
    task_queue: BinaryHeap<Reverse<u64>>,
    /// Batches a peer failed to deliver.
    peer_miss: HashMap<PeerId, HashSet<u64>>,
    pending: HashMap<PeerId, FetchRequest>,
    /// `None` while no skeleton assembly is in progress.
    results: Option<Vec<Option<SealedHeader>>>,
    processed: usize,
    offset: u64,
    completed: Option<oneshot::Sender<()>>,
}

impl HeaderFill {
    fn requeue(&mut self, from: u64) {
        self.task_queue.push(Reverse(from));
    }
}

#[derive(Debug)]
struct QueueInner {
    mode: SyncMode,
    /// Hash of the last scheduled header, `None` before the first one.
    header_head: Option<H256>,
    headers: HeaderFill,
    bodies: PartQueue,
    receipts: PartQueue,
    cache: ResultCache,
    closed: bool,
    max_header_fetch: usize,
    max_results_process: usize,
}

impl QueueInner {
    fn part_mut(&mut self, part: Part) -> &mut PartQueue {
        match part {
            Part::Bodies => &mut self.bodies,
            Part::Receipts => &mut self.receipts,
        }
    }

    fn free_slots(&self, part: Part) -> usize {
        let queue = match part {
            Part::Bodies => &self.bodies,
            Part::Receipts => &self.receipts,
        };
        self.cache.free_slots(&queue.pending, &queue.done)
    }

    /// Reserves up to `count` parts for the peer.
    ///
    /// Parts without content are resolved in place and reported as progress.
    fn reserve_parts(
        &mut self,
        part: Part,
        peer: &Arc<dyn PeerSession>,
        count: usize,
    ) -> DownloadResult<Reservation> {
        let components = self.mode.components();
        let mut space = self.free_slots(part);
        let Self { bodies, receipts, cache, .. } = self;
        let queue = match part {
            Part::Bodies => bodies,
            Part::Receipts => receipts,
        };

        if queue.tasks.is_empty() || queue.pending.contains_key(peer.peer_id()) {
            return Ok(Reservation::default())
        }

        let is_noop = |header: &SealedHeader| match part {
            Part::Bodies => header.is_empty_body(),
            Part::Receipts => header.is_empty_receipts(),
        };

        let mut send = Vec::with_capacity(count.min(space));
        let mut skip = Vec::new();
        let mut progress = false;
        let mut proc = 0;

        while proc < space && send.len() < count {
            let Some(header) = queue.tasks.pop() else { break };

            let Some(index) = cache.index_of(header.number) else {
                warn!(
                    target: "downloaders::queue",
                    number = header.number,
                    offset = cache.offset(),
                    "Reservation went beyond the result window"
                );
                for header in send.iter().chain(skip.iter()).chain(std::iter::once(&header)) {
                    queue.tasks.requeue(header);
                }
                return Err(DownloadError::InvalidChain)
            };

            let result = cache
                .slot_mut(index)
                .get_or_insert_with(|| FetchResult::new(header.clone(), components));

            if is_noop(&header) {
                result.resolve_part();
                queue.done.insert(header.hash());
                queue.tasks.complete(&header.hash());
                space = space.saturating_sub(1);
                progress = true;
                continue
            }

            if peer.lacks(&header.hash()) {
                skip.push(header);
            } else {
                send.push(header);
            }
            proc += 1;
        }

        for header in &skip {
            queue.tasks.requeue(header);
        }

        if send.is_empty() {
            return Ok(Reservation { request: None, progress })
        }

        trace!(target: "downloaders::queue", peer_id = %peer.peer_id(), %part, count = send.len(), "Reserved parts");
        let request = FetchRequest::parts(Arc::clone(peer), send);
        queue.pending.insert(peer.peer_id().clone(), request.clone());
        Ok(Reservation { request: Some(request), progress })
    }

    /// Matches delivered items positionally against the requested headers.
    ///
    /// Returns the delivery outcome and how long the request was in flight.
    fn deliver_parts<T>(
        &mut self,
        part: Part,
        peer_id: &PeerId,
        items: Vec<T>,
        reconstruct: impl Fn(&SealedHeader, T, &mut FetchResult) -> DownloadResult<()>,
    ) -> (DownloadResult<usize>, Option<Duration>) {
        let Self { bodies, receipts, cache, .. } = self;
        let queue = match part {
            Part::Bodies => bodies,
            Part::Receipts => receipts,
        };

        let Some(request) = queue.pending.remove(peer_id) else {
            return (Err(DownloadError::NoFetchesPending { peer_id: peer_id.clone() }), None)
        };
        let elapsed = request.time.elapsed();

        if items.is_empty() {
            for header in &request.headers {
                request.peer.mark_lacking(header.hash());
            }
        }

        let mut accepted = 0;
        let mut failure = None;
        let mut leftover = Vec::new();
        let mut items = items.into_iter();
        let mut headers = request.headers.into_iter();

        for header in headers.by_ref() {
            let Some(item) = items.next() else {
                leftover.push(header);
                break
            };
            let slot = match cache.index_of(header.number) {
                Some(index) => cache.slot_mut(index).as_mut(),
                None => None,
            };
            let Some(result) = slot else {
                failure = Some(DownloadError::InvalidChain);
                leftover.push(header);
                break
            };
            if let Err(err) = reconstruct(&header, item, result) {
                failure = Some(err);
                leftover.push(header);
                break
            }
            result.resolve_part();
            queue.done.insert(header.hash());
            queue.tasks.complete(&header.hash());
            accepted += 1;
        }

        for header in leftover.iter().chain(headers.as_slice()) {
            queue.tasks.requeue(header);
        }

        let outcome = match failure {
            None => Ok(accepted),
            Some(DownloadError::InvalidChain) => Err(DownloadError::InvalidChain),
            Some(source) if accepted > 0 => {
                Err(DownloadError::PartialFailure { accepted, source: Box::new(source) })
            }
            Some(_) => Err(DownloadError::StaleDelivery),
        };
        (outcome, Some(elapsed))
    }

    /// Moves every request older than `timeout` back into the task queue.
    fn expire_parts(&mut self, part: Part, timeout: Duration) -> HashMap<PeerId, usize> {
        let queue = self.part_mut(part);
        let expired: Vec<PeerId> = queue
            .pending
            .iter()
            .filter(|(_, request)| request.time.elapsed() > timeout)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();

        let mut expiries = HashMap::with_capacity(expired.len());
        for peer_id in expired {
            if let Some(request) = queue.pending.remove(&peer_id) {
                queue.requeue_request(&request);
                expiries.insert(peer_id, request.headers.len());
            }
        }
        expiries
    }
}

struct Shared {
    inner: Mutex<QueueInner>,
    /// Signalled whenever results may have become ready, or the queue was closed.
    active: Condvar,
    metrics: QueueMetrics,
}

/// Handle to the block download queue.
///
/// The handle is cheap to clone; all clones share the same state. Every method takes the queue
/// lock for the whole operation.
#[derive(Clone)]
pub struct DownloadQueue {
    shared: Arc<Shared>,
}

impl fmt::Debug for DownloadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("DownloadQueue")
            .field("mode", &inner.mode)
            .field("result_offset", &inner.cache.offset())
            .field("closed", &inner.closed)
            .finish_non_exhaustive()
    }
}

impl Default for DownloadQueue {
    fn default() -> Self {
        DownloadQueueBuilder::default().build()
    }
}

impl DownloadQueue {
    /// Returns a new [`DownloadQueueBuilder`].
    pub fn builder() -> DownloadQueueBuilder {
        DownloadQueueBuilder::default()
    }

    /// Clears all tasks, requests and results, and rewinds the result window to block zero.
    ///
    /// A skeleton assembly in progress is left untouched.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock();
        inner.closed = false;
        inner.mode = SyncMode::Full;
        inner.header_head = None;
        inner.headers.pending.clear();
        inner.bodies = PartQueue::default();
        inner.receipts = PartQueue::default();
        inner.cache.reset();
    }

    /// Marks the end of the sync and wakes every blocked [`DownloadQueue::results`] call.
    ///
    /// It may be called even if the queue is already closed.
    pub fn close(&self) {
        self.shared.inner.lock().closed = true;
        self.shared.active.notify_all();
    }

    /// Raises the result window offset to `offset` and sets the sync mode for the following
    /// reservations.
    ///
    /// The offset is never lowered.
    pub fn prepare(&self, offset: u64, mode: SyncMode) {
        let mut inner = self.shared.inner.lock();
        inner.cache.raise_offset(offset);
        inner.mode = mode;
    }

    /// Number of headers per skeleton batch.
    pub fn max_header_fetch(&self) -> usize {
        self.shared.inner.lock().max_header_fetch
    }

    /// Number of the block expected in the first slot of the result window.
    pub fn result_offset(&self) -> u64 {
        self.shared.inner.lock().cache.offset()
    }

    /// Number of skeleton batches waiting to be reserved.
    pub fn pending_headers(&self) -> usize {
        self.shared.inner.lock().headers.task_queue.len()
    }

    /// Number of bodies waiting to be reserved.
    pub fn pending_blocks(&self) -> usize {
        self.shared.inner.lock().bodies.tasks.len()
    }

    /// Number of receipt lists waiting to be reserved.
    pub fn pending_receipts(&self) -> usize {
        self.shared.inner.lock().receipts.tasks.len()
    }

    /// Whether any header request is in flight.
    pub fn in_flight_headers(&self) -> bool {
        !self.shared.inner.lock().headers.pending.is_empty()
    }

    /// Whether any body request is in flight.
    pub fn in_flight_blocks(&self) -> bool {
        !self.shared.inner.lock().bodies.pending.is_empty()
    }

    /// Whether any receipt request is in flight.
    pub fn in_flight_receipts(&self) -> bool {
        !self.shared.inner.lock().receipts.pending.is_empty()
    }

    /// Returns true if there is nothing queued, in flight or waiting to be consumed.
    pub fn idle(&self) -> bool {
        let inner = self.shared.inner.lock();
        let queued = inner.bodies.tasks.len() + inner.receipts.tasks.len();
        let pending = inner.bodies.pending.len() + inner.receipts.pending.len();
        let cached = inner.bodies.done.len() + inner.receipts.done.len();
        queued + pending + cached == 0
    }

    /// Whether body reservations would not get any slot of the result window.
    pub fn should_throttle_blocks(&self) -> bool {
        self.shared.inner.lock().free_slots(Part::Bodies) == 0
    }

    /// Whether receipt reservations would not get any slot of the result window.
    pub fn should_throttle_receipts(&self) -> bool {
        self.shared.inner.lock().free_slots(Part::Receipts) == 0
    }

    /// Schedules the header batches that fill the gaps of a skeleton chain.
    ///
    /// The batch starting at block `from + i * max_header_fetch` must end in `skeleton[i]`. The
    /// returned receiver resolves once every batch was delivered.
    ///
    /// # Panics
    ///
    /// If a skeleton assembly is already in progress, i.e. the previous one was not taken with
    /// [`DownloadQueue::retrieve_headers`].
    pub fn schedule_skeleton(&self, from: u64, skeleton: Vec<SealedHeader>) -> oneshot::Receiver<()> {
        let mut inner = self.shared.inner.lock();
        assert!(inner.headers.results.is_none(), "skeleton assembly already in progress");

        trace!(target: "downloaders::queue", from, len = skeleton.len(), "Filling up skeleton");
        let max_header_fetch = inner.max_header_fetch;
        let (tx, rx) = oneshot::channel();

        let mut fill = HeaderFill {
            results: Some(vec![None; skeleton.len() * max_header_fetch]),
            offset: from,
            ..Default::default()
        };
        for (i, header) in skeleton.into_iter().enumerate() {
            let index = from + (i * max_header_fetch) as u64;
            fill.task_pool.insert(index, header);
            fill.task_queue.push(Reverse(index));
        }
        if fill.task_pool.is_empty() {
            let _ = tx.send(());
        } else {
            fill.completed = Some(tx);
        }
        inner.headers = fill;
        rx
    }

    /// Takes the assembled skeleton headers and the number of them already pushed to the
    /// processor, ending the skeleton assembly.
    pub fn retrieve_headers(&self) -> (Vec<Option<SealedHeader>>, usize) {
        let mut inner = self.shared.inner.lock();
        let headers = inner.headers.results.take().unwrap_or_default();
        let processed = std::mem::take(&mut inner.headers.processed);
        (headers, processed)
    }

    /// Schedules a contiguous, parent linked header chain starting at block `from` for body (and
    /// in fast sync receipt) retrieval.
    ///
    /// The first header breaking the numbering or the ancestry ends the batch. Returns the headers
    /// that were scheduled.
    pub fn schedule(&self, headers: Vec<SealedHeader>, mut from: u64) -> Vec<SealedHeader> {
        let mut inner = self.shared.inner.lock();
        trace!(target: "downloaders::queue", from, len = headers.len(), "Scheduling headers");

        let mut inserts = Vec::with_capacity(headers.len());
        let mut resolved = false;
        for header in headers {
            let hash = header.hash();
            if header.number != from {
                warn!(target: "downloaders::queue", number = header.number, ?hash, expected = from, "Header broke chain ordering");
                break
            }
            if inner.header_head.map_or(false, |head| head != header.parent_hash) {
                warn!(target: "downloaders::queue", number = header.number, ?hash, "Header broke chain ancestry");
                break
            }
            if inner.bodies.tasks.contains(&hash) {
                throttle!(Duration::from_secs(1), || {
                    warn!(target: "downloaders::queue", number = header.number, ?hash, "Header already scheduled for body fetch")
                });
                continue
            }
            if inner.receipts.tasks.contains(&hash) {
                throttle!(Duration::from_secs(1), || {
                    warn!(target: "downloaders::queue", number = header.number, ?hash, "Header already scheduled for receipt fetch")
                });
                continue
            }

            // parts without content are resolved right away if the block is in the window
            let components = inner.mode.components();
            let fetch_receipts = inner.mode.fetches_receipts();
            let QueueInner { cache, bodies, receipts, .. } = &mut *inner;
            let mut slot = match cache.index_of(header.number) {
                Some(index) => Some(
                    cache
                        .slot_mut(index)
                        .get_or_insert_with(|| FetchResult::new(header.clone(), components)),
                ),
                None => None,
            };

            if let (Some(result), true) = (slot.as_deref_mut(), header.is_empty_body()) {
                result.resolve_part();
                bodies.done.insert(hash);
                resolved = true;
            } else {
                bodies.tasks.schedule(header.clone());
            }
            if fetch_receipts {
                if let (Some(result), true) = (slot.as_deref_mut(), header.is_empty_receipts()) {
                    result.resolve_part();
                    receipts.done.insert(hash);
                    resolved = true;
                } else {
                    receipts.tasks.schedule(header.clone());
                }
            }
            inner.header_head = Some(hash);
            inserts.push(header);
            from += 1;
        }
        if resolved {
            self.shared.active.notify_one();
        }
        inserts
    }

    /// Reserves the lowest skeleton batch the peer is not known to miss.
    pub fn reserve_headers(&self, peer: &Arc<dyn PeerSession>) -> HeaderReservation {
        let mut inner = self.shared.inner.lock();
        let capacity = inner.cache.capacity();
        let offset = inner.cache.offset();
        let max_header_fetch = inner.max_header_fetch;
        let fill = &mut inner.headers;

        if fill.pending.contains_key(peer.peer_id()) {
            return HeaderReservation::Nothing
        }

        let mut send = None;
        let mut skip = Vec::new();
        while send.is_none() {
            let Some(Reverse(from)) = fill.task_queue.pop() else { break };
            if fill.peer_miss.get(peer.peer_id()).map_or(false, |miss| miss.contains(&from)) {
                skip.push(from);
            } else {
                send = Some(from);
            }
        }
        for from in skip {
            fill.requeue(from);
        }

        let Some(from) = send else { return HeaderReservation::Nothing };

        // the batch must fit into the result window once scheduled
        let end = i128::from(from) - i128::from(offset) + max_header_fetch as i128;
        if end < 0 || end >= capacity as i128 {
            debug!(target: "downloaders::queue", from, offset, "Header reservation throttled by the result window");
            fill.requeue(from);
            return HeaderReservation::Throttled
        }

        let request = FetchRequest::headers(Arc::clone(peer), from);
        fill.pending.insert(peer.peer_id().clone(), request.clone());
        HeaderReservation::Reserved(request)
    }

    /// Reserves up to `count` body fetches for the peer, skipping the ones it lacks.
    ///
    /// # Errors
    ///
    /// [`DownloadError::InvalidChain`] if a scheduled header falls outside of the result window.
    pub fn reserve_bodies(
        &self,
        peer: &Arc<dyn PeerSession>,
        count: usize,
    ) -> DownloadResult<Reservation> {
        self.reserve(Part::Bodies, peer, count)
    }

    /// Reserves up to `count` receipt fetches for the peer, skipping the ones it lacks.
    ///
    /// # Errors
    ///
    /// [`DownloadError::InvalidChain`] if a scheduled header falls outside of the result window.
    pub fn reserve_receipts(
        &self,
        peer: &Arc<dyn PeerSession>,
        count: usize,
    ) -> DownloadResult<Reservation> {
        self.reserve(Part::Receipts, peer, count)
    }

    fn reserve(
        &self,
        part: Part,
        peer: &Arc<dyn PeerSession>,
        count: usize,
    ) -> DownloadResult<Reservation> {
        let mut inner = self.shared.inner.lock();
        let reservation = inner.reserve_parts(part, peer, count)?;
        if reservation.progress {
            self.shared.active.notify_one();
        }
        Ok(reservation)
    }

    /// Returns the skeleton batch of a request to the task queue.
    pub fn cancel_headers(&self, request: &FetchRequest) {
        let mut inner = self.shared.inner.lock();
        if request.from > 0 {
            inner.headers.requeue(request.from);
        }
        inner.headers.pending.remove(request.peer_id());
    }

    /// Returns the headers of a body request to the task queue.
    pub fn cancel_bodies(&self, request: &FetchRequest) {
        self.cancel(Part::Bodies, request)
    }

    /// Returns the headers of a receipt request to the task queue.
    pub fn cancel_receipts(&self, request: &FetchRequest) {
        self.cancel(Part::Receipts, request)
    }

    fn cancel(&self, part: Part, request: &FetchRequest) {
        let mut inner = self.shared.inner.lock();
        let queue = inner.part_mut(part);
        queue.requeue_request(request);
        queue.pending.remove(request.peer_id());
    }

    /// Returns every body and receipt request of the peer to the task queues.
    ///
    /// Called when a peer disconnects.
    pub fn revoke(&self, peer_id: &PeerId) {
        let mut inner = self.shared.inner.lock();
        for part in [Part::Bodies, Part::Receipts] {
            let queue = inner.part_mut(part);
            if let Some(request) = queue.pending.remove(peer_id) {
                queue.requeue_request(&request);
            }
        }
    }

    /// Cancels the header requests older than `timeout`, returning the responsible peers.
    ///
    /// Header requests carry no headers, so every peer maps to zero.
    pub fn expire_headers(&self, timeout: Duration) -> HashMap<PeerId, usize> {
        let mut inner = self.shared.inner.lock();
        let fill = &mut inner.headers;
        let expired: Vec<PeerId> = fill
            .pending
            .iter()
            .filter(|(_, request)| request.time.elapsed() > timeout)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();

        let mut expiries = HashMap::with_capacity(expired.len());
        for peer_id in expired {
            if let Some(request) = fill.pending.remove(&peer_id) {
                self.shared.metrics.header_timeouts.increment(1);
                if request.from > 0 {
                    fill.requeue(request.from);
                }
                expiries.insert(peer_id, request.headers.len());
            }
        }
        expiries
    }

    /// Cancels the body requests older than `timeout`, returning the responsible peers along with
    /// the number of bodies they failed to deliver.
    pub fn expire_bodies(&self, timeout: Duration) -> HashMap<PeerId, usize> {
        let expiries = self.shared.inner.lock().expire_parts(Part::Bodies, timeout);
        self.shared.metrics.body_timeouts.increment(expiries.len() as u64);
        expiries
    }

    /// Cancels the receipt requests older than `timeout`, returning the responsible peers along
    /// with the number of receipt lists they failed to deliver.
    pub fn expire_receipts(&self, timeout: Duration) -> HashMap<PeerId, usize> {
        let expiries = self.shared.inner.lock().expire_parts(Part::Receipts, timeout);
        self.shared.metrics.receipt_timeouts.increment(expiries.len() as u64);
        expiries
    }

    /// Injects a skeleton batch delivered by the peer.
    ///
    /// The batch is either accepted as a whole or rejected. An accepted batch completes the ready
    /// prefix of the skeleton, which is pushed to `processor` without blocking.
    ///
    /// # Errors
    ///
    /// [`DownloadError::NoFetchesPending`] if the peer has no header request in flight, or the
    /// reason the batch does not fit the skeleton. A rejected batch is requeued and the peer is
    /// not asked for it again.
    pub fn deliver_headers(
        &self,
        peer_id: &PeerId,
        headers: Vec<SealedHeader>,
        processor: &mpsc::Sender<Vec<SealedHeader>>,
    ) -> DownloadResult<usize> {
        let mut inner = self.shared.inner.lock();
        let max_header_fetch = inner.max_header_fetch;
        let fill = &mut inner.headers;

        let Some(request) = fill.pending.remove(peer_id) else {
            return Err(DownloadError::NoFetchesPending { peer_id: peer_id.clone() })
        };
        self.shared.metrics.header_request_duration.record(request.time.elapsed().as_secs_f64());

        let Some(target) = fill.task_pool.get(&request.from).map(SealedHeader::hash) else {
            // the skeleton was retrieved while the request was in flight
            return Err(DownloadError::StaleDelivery)
        };

        if let Err(err) = validate_batch(&headers, request.from, target, max_header_fetch) {
            trace!(target: "downloaders::queue", %peer_id, from = request.from, %err, "Skeleton filling not accepted");
            self.shared.metrics.headers_dropped.increment(1);
            fill.peer_miss.entry(peer_id.clone()).or_default().insert(request.from);
            fill.requeue(request.from);
            return Err(err)
        }
        self.shared.metrics.headers_in.increment(1);

        let accepted = headers.len();
        let start = (request.from - fill.offset) as usize;
        let Some(results) = fill.results.as_mut() else {
            return Err(DownloadError::StaleDelivery)
        };
        for (slot, header) in results[start..].iter_mut().zip(headers) {
            *slot = Some(header);
        }
        fill.task_pool.remove(&request.from);

        let mut ready = 0;
        while fill.processed + ready < results.len() && results[fill.processed + ready].is_some() {
            ready += max_header_fetch;
        }
        if ready > 0 {
            let process: Vec<SealedHeader> =
                results[fill.processed..fill.processed + ready].iter().flatten().cloned().collect();
            let count = process.len();
            let first = process.first().map(|header| header.number);
            if processor.try_send(process).is_ok() {
                trace!(target: "downloaders::queue", %peer_id, count, ?first, "Pre-scheduled new headers");
                fill.processed += count;
            }
        }

        if fill.task_pool.is_empty() {
            if let Some(completed) = fill.completed.take() {
                let _ = completed.send(());
            }
        }
        Ok(accepted)
    }

    /// Injects bodies delivered by the peer into the result window.
    ///
    /// Bodies are matched in request order. An empty delivery marks all requested blocks as
    /// lacking on the peer. Every header whose body was not accepted goes back to the task queue.
    ///
    /// # Errors
    ///
    /// * [`DownloadError::NoFetchesPending`] if the peer has no body request in flight.
    /// * [`DownloadError::InvalidChain`] if a requested block fell out of the result window.
    /// * [`DownloadError::PartialFailure`] if some bodies were accepted before one did not match.
    /// * [`DownloadError::StaleDelivery`] if none of the bodies matched.
    pub fn deliver_bodies(&self, peer_id: &PeerId, bodies: Vec<BlockBody>) -> DownloadResult<usize> {
        let delivered = bodies.len();
        let reconstruct = |header: &SealedHeader, body: BlockBody, result: &mut FetchResult| {
            if !body.matches_header(header) {
                return Err(DownloadError::InvalidBody { number: header.number, hash: header.hash() })
            }
            result.transactions = body.transactions;
            result.uncles = body.uncles;
            Ok(())
        };

        let mut inner = self.shared.inner.lock();
        let (outcome, elapsed) = inner.deliver_parts(Part::Bodies, peer_id, bodies, reconstruct);
        let metrics = &self.shared.metrics;
        if let Some(elapsed) = elapsed {
            metrics.body_request_duration.record(elapsed.as_secs_f64());
        }
        self.finish_delivery(Part::Bodies, peer_id, delivered, outcome)
    }

    /// Injects receipts delivered by the peer into the result window.
    ///
    /// Same rules as [`DownloadQueue::deliver_bodies`], matching against the receipt roots.
    pub fn deliver_receipts(
        &self,
        peer_id: &PeerId,
        receipts: Vec<Vec<CurrencyReceipts>>,
    ) -> DownloadResult<usize> {
        let delivered = receipts.len();
        let reconstruct =
            |header: &SealedHeader, receipts: Vec<CurrencyReceipts>, result: &mut FetchResult| {
                if !header.matches_receipts(&receipts) {
                    return Err(DownloadError::InvalidReceipts {
                        number: header.number,
                        hash: header.hash(),
                    })
                }
                result.receipts = receipts;
                Ok(())
            };

        let mut inner = self.shared.inner.lock();
        let (outcome, elapsed) =
            inner.deliver_parts(Part::Receipts, peer_id, receipts, reconstruct);
        if let Some(elapsed) = elapsed {
            self.shared.metrics.receipt_request_duration.record(elapsed.as_secs_f64());
        }
        self.finish_delivery(Part::Receipts, peer_id, delivered, outcome)
    }

    /// Records the delivery outcome and wakes a waiting consumer if anything was accepted.
    ///
    /// Must be called while the queue lock is held by the caller.
    fn finish_delivery(
        &self,
        part: Part,
        peer_id: &PeerId,
        delivered: usize,
        outcome: DownloadResult<usize>,
    ) -> DownloadResult<usize> {
        let accepted = match &outcome {
            Ok(accepted) => *accepted,
            Err(err) => err.accepted(),
        };
        let metrics = &self.shared.metrics;
        let (accepted_counter, dropped_counter) = match part {
            Part::Bodies => (&metrics.bodies_in, &metrics.bodies_dropped),
            Part::Receipts => (&metrics.receipts_in, &metrics.receipts_dropped),
        };
        accepted_counter.increment(accepted as u64);
        dropped_counter.increment(delivered.saturating_sub(accepted) as u64);

        if let Err(err) = &outcome {
            metrics.increment_errors(err);
            if matches!(err, DownloadError::StaleDelivery) {
                throttle!(Duration::from_secs(1), || {
                    debug!(target: "downloaders::queue", %peer_id, %part, "Stale delivery")
                });
            } else {
                debug!(target: "downloaders::queue", %peer_id, %part, %err, "Delivery failed");
            }
        }
        if accepted > 0 {
            self.shared.active.notify_one();
        }
        outcome
    }

    /// Takes the longest prefix of completed blocks out of the result window.
    ///
    /// With `block` set, waits until at least one result is ready or the queue is closed.
    /// Returns nothing once the queue is closed.
    pub fn results(&self, block: bool) -> Vec<FetchResult> {
        let mut inner = self.shared.inner.lock();

        let mut ready = inner.cache.ready();
        while ready == 0 && !inner.closed {
            if !block {
                return Vec::new()
            }
            self.shared.active.wait(&mut inner);
            ready = inner.cache.ready();
        }
        if inner.closed {
            return Vec::new()
        }

        let count = ready.min(inner.max_results_process);
        let results = inner.cache.take(count);
        for result in &results {
            inner.bodies.done.remove(&result.hash);
            inner.receipts.done.remove(&result.hash);
        }
        trace!(target: "downloaders::queue", count, offset = inner.cache.offset(), "Handing out results");
        results
    }
}

/// Checks that a header batch exactly fills the skeleton gap starting at `from` and ending in
/// the header with hash `target`.
fn validate_batch(
    headers: &[SealedHeader],
    from: u64,
    target: H256,
    max_header_fetch: usize,
) -> DownloadResult<()> {
    if headers.len() != max_header_fetch {
        return Err(DownloadError::HeadersResponseTooShort {
            received: headers.len() as u64,
            expected: max_header_fetch as u64,
        })
    }
    let (Some(first), Some(last)) = (headers.first(), headers.last()) else {
        return Err(DownloadError::HeadersResponseTooShort { received: 0, expected: 0 })
    };
    if first.number != from {
        return Err(DownloadError::HeadersResponseStartBlockMismatch {
            received: first.number,
            expected: from,
        })
    }
    if last.hash() != target {
        return Err(DownloadError::InvalidTip { received: last.hash(), expected: target })
    }
    for pair in headers.windows(2) {
        let (parent, header) = (&pair[0], &pair[1]);
        if header.number != parent.number + 1 || header.parent_hash != parent.hash() {
            return Err(DownloadError::MismatchedHeaders {
                header_number: header.number,
                header_hash: header.hash(),
                parent_number: parent.number,
                parent_hash: parent.hash(),
            })
        }
    }
    Ok(())
}

/// Builder for [`DownloadQueue`].
#[derive(Debug, Clone)]
pub struct DownloadQueueBuilder {
    /// Maximum number of blocks in the result window.
    pub block_cache_items: usize,
    /// Approximate memory budget of the result window in bytes.
    pub block_cache_memory: usize,
    /// Weight of the latest block in the block size average.
    pub block_cache_size_weight: f64,
    /// Number of headers per skeleton batch.
    pub max_header_fetch: usize,
    /// Maximum number of results returned at once.
    pub max_results_process: usize,
}

impl Default for DownloadQueueBuilder {
    fn default() -> Self {
        Self {
            block_cache_items: BLOCK_CACHE_ITEMS,
            block_cache_memory: BLOCK_CACHE_MEMORY,
            block_cache_size_weight: BLOCK_CACHE_SIZE_WEIGHT,
            max_header_fetch: MAX_HEADER_FETCH,
            max_results_process: MAX_RESULTS_PROCESS,
        }
    }
}

impl DownloadQueueBuilder {
    /// Set the maximum number of blocks in the result window.
    pub fn with_block_cache_items(mut self, block_cache_items: usize) -> Self {
        self.block_cache_items = block_cache_items;
        self
    }

    /// Set the memory budget of the result window.
    pub fn with_block_cache_memory(mut self, block_cache_memory: usize) -> Self {
        self.block_cache_memory = block_cache_memory;
        self
    }

    /// Set the weight of the latest block in the block size average.
    pub fn with_block_cache_size_weight(mut self, block_cache_size_weight: f64) -> Self {
        self.block_cache_size_weight = block_cache_size_weight;
        self
    }

    /// Set the number of headers per skeleton batch.
    pub fn with_max_header_fetch(mut self, max_header_fetch: usize) -> Self {
        self.max_header_fetch = max_header_fetch;
        self
    }

    /// Set the maximum number of results returned at once.
    pub fn with_max_results_process(mut self, max_results_process: usize) -> Self {
        self.max_results_process = max_results_process;
        self
    }

    /// Consume self and return the queue.
    pub fn build(self) -> DownloadQueue {
        let Self {
            block_cache_items,
            block_cache_memory,
            block_cache_size_weight,
            max_header_fetch,
            max_results_process,
        } = self;
        let inner = QueueInner {
            mode: SyncMode::default(),
            header_head: None,
            headers: HeaderFill::default(),
            bodies: PartQueue::default(),
            receipts: PartQueue::default(),
            cache: ResultCache::new(block_cache_items, block_cache_memory, block_cache_size_weight),
            closed: false,
            max_header_fetch: max_header_fetch.max(1),
            max_results_process: max_results_process.max(1),
        };
        DownloadQueue {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                active: Condvar::new(),
                metrics: QueueMetrics::default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chainsync_interfaces::test_utils::{
        generators::{random_block_range, random_block_with_receipts, random_header_range},
        TestPeer,
    };
    use chainsync_primitives::SealedBlock;

    fn peer(id: &str) -> Arc<dyn PeerSession> {
        Arc::new(TestPeer::new(id))
    }

    fn headers_of(blocks: &[SealedBlock]) -> Vec<SealedHeader> {
        blocks.iter().map(|block| block.header.clone()).collect()
    }

    fn bodies_for(request: &FetchRequest, blocks: &[SealedBlock]) -> Vec<BlockBody> {
        let bodies: HashMap<H256, BlockBody> =
            blocks.iter().map(|block| (block.hash(), block.body.clone())).collect();
        request.headers.iter().map(|header| bodies[&header.hash()].clone()).collect()
    }

    #[test]
    fn happy_path_bulk_sync() {
        chainsync_tracing::init_test_tracing();
        let queue = DownloadQueue::default();
        let blocks = random_block_range(100..105, H256::ZERO, 1..3);
        queue.prepare(100, SyncMode::Full);

        let inserted = queue.schedule(headers_of(&blocks), 100);
        assert_eq!(inserted.len(), 5);
        assert_eq!(queue.pending_blocks(), 5);

        let peer = peer("peer-a");
        let reservation = queue.reserve_bodies(&peer, 16).unwrap();
        let request = reservation.request.unwrap();
        assert_eq!(request.headers.len(), 5);
        assert!(queue.in_flight_blocks());

        let accepted = queue.deliver_bodies(peer.peer_id(), bodies_for(&request, &blocks));
        assert_eq!(accepted, Ok(5));

        let results = queue.results(false);
        let numbers: Vec<u64> = results.iter().map(|result| result.header.number).collect();
        assert_eq!(numbers, vec![100, 101, 102, 103, 104]);
        assert_eq!(queue.result_offset(), 105);
        assert!(queue.idle());

        let block = results.into_iter().next().unwrap().into_block();
        assert_eq!(block, blocks[0]);
    }

    #[test]
    fn results_wait_for_contiguous_prefix() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(100..105, H256::ZERO, 1..3);
        queue.prepare(100, SyncMode::Full);
        queue.schedule(headers_of(&blocks), 100);

        let first = peer("first");
        let rest = peer("rest");
        let first_request = queue.reserve_bodies(&first, 1).unwrap().request.unwrap();
        let rest_request = queue.reserve_bodies(&rest, 10).unwrap().request.unwrap();
        assert_eq!(first_request.headers[0].number, 100);
        assert_eq!(rest_request.headers.len(), 4);

        assert_eq!(queue.deliver_bodies(rest.peer_id(), bodies_for(&rest_request, &blocks)), Ok(4));
        // block 100 is still missing, nothing can be handed out
        assert!(queue.results(false).is_empty());
        assert_eq!(queue.result_offset(), 100);

        assert_eq!(
            queue.deliver_bodies(first.peer_id(), bodies_for(&first_request, &blocks)),
            Ok(1)
        );
        assert_eq!(queue.results(false).len(), 5);
        assert_eq!(queue.result_offset(), 105);
    }

    #[test]
    fn prepare_never_lowers_offset() {
        let queue = DownloadQueue::default();
        queue.prepare(100, SyncMode::Full);
        queue.prepare(50, SyncMode::Fast);
        assert_eq!(queue.result_offset(), 100);
    }

    #[test]
    fn schedule_truncates_on_broken_chain() {
        let queue = DownloadQueue::default();
        let mut headers = random_header_range(10..15, H256::ZERO);
        let mut broken = headers[2].clone().unseal();
        broken.parent_hash = H256::repeat_byte(0xab);
        headers[2] = broken.seal_slow();

        let inserted = queue.schedule(headers.clone(), 10);
        assert_eq!(inserted.len(), 2);

        // wrong starting number
        let queue = DownloadQueue::default();
        assert!(queue.schedule(headers, 11).is_empty());
    }

    #[test]
    fn schedule_rejects_rescheduled_headers() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(1..3, H256::ZERO, 1..2);
        let headers = headers_of(&blocks);

        assert_eq!(queue.schedule(headers.clone(), 1).len(), 2);
        assert!(queue.schedule(headers[..1].to_vec(), 1).is_empty());
        assert_eq!(queue.pending_blocks(), 2);
    }

    #[test]
    fn single_request_per_peer() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..10, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("peer");
        assert!(queue.reserve_bodies(&peer, 2).unwrap().request.is_some());
        assert!(queue.reserve_bodies(&peer, 2).unwrap().request.is_none());
        assert_eq!(queue.pending_blocks(), 8);
    }

    #[test]
    fn repeated_delivery_is_rejected() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..3, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("peer");
        let request = queue.reserve_bodies(&peer, 3).unwrap().request.unwrap();
        let bodies = bodies_for(&request, &blocks);

        assert_eq!(queue.deliver_bodies(peer.peer_id(), bodies.clone()), Ok(3));
        let offset = queue.result_offset();
        assert_matches!(
            queue.deliver_bodies(peer.peer_id(), bodies),
            Err(DownloadError::NoFetchesPending { .. })
        );
        assert_eq!(queue.result_offset(), offset);
        assert_eq!(queue.results(false).len(), 3);
    }

    #[test]
    fn mismatching_delivery_is_stale() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..3, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("peer");
        let request = queue.reserve_bodies(&peer, 3).unwrap().request.unwrap();
        let bodies = vec![BlockBody::default(); request.headers.len()];

        assert_eq!(queue.deliver_bodies(peer.peer_id(), bodies), Err(DownloadError::StaleDelivery));
        assert_eq!(queue.pending_blocks(), 3);
        assert!(!queue.in_flight_blocks());
    }

    #[test]
    fn partial_delivery_requeues_rest() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..3, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("peer");
        let request = queue.reserve_bodies(&peer, 3).unwrap().request.unwrap();
        let mut bodies = bodies_for(&request, &blocks);
        bodies[1] = BlockBody::default();

        let outcome = queue.deliver_bodies(peer.peer_id(), bodies);
        assert_matches!(
            outcome,
            Err(DownloadError::PartialFailure { accepted: 1, ref source })
                if matches!(**source, DownloadError::InvalidBody { number: 1, .. })
        );
        assert_eq!(queue.pending_blocks(), 2);
        assert_eq!(queue.results(false).len(), 1);
    }

    #[test]
    fn empty_delivery_marks_lacking() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..2, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("peer");
        queue.reserve_bodies(&peer, 2).unwrap().request.unwrap();
        assert_eq!(queue.deliver_bodies(peer.peer_id(), Vec::new()), Ok(0));

        assert!(blocks.iter().all(|block| peer.lacks(&block.hash())));
        assert!(queue.reserve_bodies(&peer, 2).unwrap().request.is_none());
        assert_eq!(queue.pending_blocks(), 2);

        let other = self::peer("other");
        assert_eq!(queue.reserve_bodies(&other, 2).unwrap().request.unwrap().headers.len(), 2);
    }

    #[test]
    fn empty_bodies_resolve_without_request() {
        chainsync_tracing::init_test_tracing();
        let queue = DownloadQueue::default();
        let headers = random_header_range(0..4, H256::ZERO);
        assert!(headers.iter().all(|header| header.is_empty_body()));
        queue.schedule(headers, 0);

        assert_eq!(queue.pending_blocks(), 0);
        assert_eq!(queue.results(false).len(), 4);
        assert_eq!(queue.result_offset(), 4);

        let reservation = queue.reserve_bodies(&peer("peer"), 10).unwrap();
        assert!(reservation.request.is_none());
        assert!(!reservation.progress);
    }

    #[test]
    fn empty_blocks_wake_blocked_results() {
        let queue = DownloadQueue::default();
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.results(true))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.schedule(random_header_range(0..2, H256::ZERO), 0);

        assert_eq!(waiter.join().unwrap().len(), 2);
    }

    #[test]
    fn empty_blocks_beyond_window_resolve_on_reservation() {
        let queue = DownloadQueue::builder().with_block_cache_items(2).build();
        queue.schedule(random_header_range(0..4, H256::ZERO), 0);
        assert_eq!(queue.pending_blocks(), 2);
        assert_eq!(queue.results(false).len(), 2);

        let reservation = queue.reserve_bodies(&peer("peer"), 10).unwrap();
        assert!(reservation.request.is_none());
        assert!(reservation.progress);
        let numbers: Vec<u64> =
            queue.results(false).iter().map(|result| result.header.number).collect();
        assert_eq!(numbers, vec![2, 3]);
    }

    #[test]
    fn fast_sync_resolves_empty_receipts_on_schedule() {
        let queue = DownloadQueue::default();
        queue.prepare(0, SyncMode::Fast);
        queue.schedule(random_header_range(0..3, H256::ZERO), 0);

        assert_eq!(queue.pending_receipts(), 0);
        assert_eq!(queue.results(false).len(), 3);
    }

    #[test]
    fn unbounded_reservation_count_is_capped_by_space() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..3, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let request = queue.reserve_bodies(&peer("peer"), usize::MAX).unwrap().request.unwrap();
        assert_eq!(request.headers.len(), 3);
    }

    #[test]
    fn out_of_window_reservation_is_invalid_chain() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(5..8, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 5);
        queue.prepare(10, SyncMode::Full);

        assert_eq!(queue.reserve_bodies(&peer("peer"), 3).unwrap_err(), DownloadError::InvalidChain);
        assert_eq!(queue.pending_blocks(), 3);
    }

    #[test]
    fn expired_requests_are_requeued() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..3, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("slow");
        queue.reserve_bodies(&peer, 3).unwrap().request.unwrap();
        assert!(queue.expire_bodies(Duration::from_secs(60)).is_empty());

        std::thread::sleep(Duration::from_millis(2));
        let expired = queue.expire_bodies(Duration::ZERO);
        assert_eq!(expired.get(peer.peer_id()), Some(&3));
        assert_eq!(queue.pending_blocks(), 3);
        assert!(!queue.in_flight_blocks());
    }

    #[test]
    fn revoke_returns_requests() {
        let queue = DownloadQueue::default();
        queue.prepare(0, SyncMode::Fast);
        let blocks = random_block_range(0..2, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("leaving");
        queue.reserve_bodies(&peer, 2).unwrap().request.unwrap();
        queue.reserve_receipts(&peer, 2).unwrap().request.unwrap();
        assert_eq!((queue.pending_blocks(), queue.pending_receipts()), (0, 0));

        queue.revoke(peer.peer_id());
        assert_eq!((queue.pending_blocks(), queue.pending_receipts()), (2, 2));
        assert!(!queue.in_flight_blocks() && !queue.in_flight_receipts());
    }

    #[test]
    fn cancelled_request_is_requeued() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..2, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let peer = peer("peer");
        let request = queue.reserve_bodies(&peer, 2).unwrap().request.unwrap();
        queue.cancel_bodies(&request);
        assert_eq!(queue.pending_blocks(), 2);
        assert!(queue.reserve_bodies(&peer, 2).unwrap().request.is_some());
    }

    #[test]
    fn fast_sync_waits_for_receipts() {
        let queue = DownloadQueue::default();
        queue.prepare(0, SyncMode::Fast);
        let (block, receipts) = random_block_with_receipts(0, None, Some(2));
        queue.schedule(vec![block.header.clone()], 0);

        let peer = peer("peer");
        queue.reserve_bodies(&peer, 1).unwrap().request.unwrap();
        assert_eq!(queue.deliver_bodies(peer.peer_id(), vec![block.body.clone()]), Ok(1));
        assert!(queue.results(false).is_empty());

        queue.reserve_receipts(&peer, 1).unwrap().request.unwrap();
        assert_eq!(queue.deliver_receipts(peer.peer_id(), vec![receipts.clone()]), Ok(1));

        let results = queue.results(false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].receipts, receipts);
    }

    #[test]
    fn mismatching_receipts_are_stale() {
        let queue = DownloadQueue::default();
        queue.prepare(0, SyncMode::Fast);
        let (block, _) = random_block_with_receipts(0, None, Some(2));
        queue.schedule(vec![block.header.clone()], 0);

        let peer = peer("peer");
        queue.reserve_receipts(&peer, 1).unwrap().request.unwrap();
        assert_eq!(
            queue.deliver_receipts(peer.peer_id(), vec![Vec::new()]),
            Err(DownloadError::StaleDelivery)
        );
        assert_eq!(queue.pending_receipts(), 1);
    }

    #[test]
    fn throttles_when_window_is_full() {
        let queue = DownloadQueue::builder().with_block_cache_items(2).build();
        let blocks = random_block_range(0..3, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);
        assert!(!queue.should_throttle_blocks());

        let request = queue.reserve_bodies(&peer("peer"), 10).unwrap().request.unwrap();
        assert_eq!(request.headers.len(), 2);
        assert!(queue.should_throttle_blocks());
        assert!(queue.reserve_bodies(&peer("other"), 10).unwrap().request.is_none());
    }

    #[test]
    fn close_wakes_blocked_results() {
        let queue = DownloadQueue::default();
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.results(true))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        queue.close();
        assert!(waiter.join().unwrap().is_empty());
    }

    #[test]
    fn delivery_wakes_blocked_results() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(0..2, H256::ZERO, 1..3);
        queue.schedule(headers_of(&blocks), 0);

        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.results(true))
        };
        let peer = peer("peer");
        let request = queue.reserve_bodies(&peer, 2).unwrap().request.unwrap();
        queue.deliver_bodies(peer.peer_id(), bodies_for(&request, &blocks)).unwrap();

        assert_eq!(waiter.join().unwrap().len(), 2);
    }

    #[test]
    fn reset_clears_state() {
        let queue = DownloadQueue::default();
        let blocks = random_block_range(10..12, H256::ZERO, 1..3);
        queue.prepare(10, SyncMode::Fast);
        queue.schedule(headers_of(&blocks), 10);
        assert!(!queue.idle());

        queue.reset();
        assert!(queue.idle());
        assert_eq!(queue.result_offset(), 0);
        assert_eq!(queue.pending_receipts(), 0);
    }

    fn skeleton_queue() -> (DownloadQueue, Vec<SealedHeader>) {
        let queue = DownloadQueue::builder().with_max_header_fetch(4).build();
        (queue, random_header_range(1..9, H256::ZERO))
    }

    #[test]
    fn skeleton_fill_is_all_or_nothing() {
        chainsync_tracing::init_test_tracing();
        let (queue, headers) = skeleton_queue();
        let mut completed =
            queue.schedule_skeleton(1, vec![headers[3].clone(), headers[7].clone()]);
        assert_eq!(queue.pending_headers(), 2);
        let (processor, mut processed) = mpsc::channel(1);

        let first = peer("first");
        let request = queue.reserve_headers(&first).into_request().unwrap();
        assert_eq!(request.from, 1);
        assert_matches!(queue.reserve_headers(&first), HeaderReservation::Nothing);

        // batch of the wrong gap
        let err = queue.deliver_headers(first.peer_id(), headers[4..8].to_vec(), &processor);
        assert!(err.unwrap_err().is_skeleton_rejection());
        assert_eq!(queue.pending_headers(), 2);
        assert!(processed.try_recv().is_err());

        // the peer is not asked for the batch it missed
        let request = queue.reserve_headers(&first).into_request().unwrap();
        assert_eq!(request.from, 5);
        assert_eq!(queue.deliver_headers(first.peer_id(), headers[4..8].to_vec(), &processor), Ok(4));
        assert!(processed.try_recv().is_err());

        let second = peer("second");
        let request = queue.reserve_headers(&second).into_request().unwrap();
        assert_eq!(request.from, 1);
        assert_eq!(queue.deliver_headers(second.peer_id(), headers[..4].to_vec(), &processor), Ok(4));

        assert_eq!(processed.try_recv().unwrap(), headers);
        assert!(completed.try_recv().is_ok());

        let (filled, processed) = queue.retrieve_headers();
        assert_eq!(processed, 8);
        assert_eq!(filled.into_iter().flatten().collect::<Vec<_>>(), headers);
    }

    #[test]
    fn skeleton_rejects_broken_batches() {
        let (queue, headers) = skeleton_queue();
        let _completed = queue.schedule_skeleton(1, vec![headers[3].clone()]);
        let (processor, _processed) = mpsc::channel(1);
        let peer = peer("peer");

        queue.reserve_headers(&peer).into_request().unwrap();
        assert_matches!(
            queue.deliver_headers(peer.peer_id(), headers[..3].to_vec(), &processor),
            Err(DownloadError::HeadersResponseTooShort { received: 3, expected: 4 })
        );

        let other = self::peer("other");
        queue.reserve_headers(&other).into_request().unwrap();
        let mut batch = headers[..4].to_vec();
        batch.swap(1, 2);
        assert_matches!(
            queue.deliver_headers(other.peer_id(), batch, &processor),
            Err(DownloadError::MismatchedHeaders { .. })
        );

        let third = self::peer("third");
        queue.reserve_headers(&third).into_request().unwrap();
        assert_matches!(
            queue.deliver_headers(third.peer_id(), headers[1..5].to_vec(), &processor),
            Err(DownloadError::HeadersResponseStartBlockMismatch { received: 2, expected: 1 })
        );

        let (filled, _) = queue.retrieve_headers();
        assert!(filled.iter().all(Option::is_none));
    }

    #[test]
    #[should_panic(expected = "skeleton assembly already in progress")]
    fn second_skeleton_panics() {
        let (queue, headers) = skeleton_queue();
        let _first = queue.schedule_skeleton(1, vec![headers[3].clone()]);
        let _second = queue.schedule_skeleton(5, vec![headers[7].clone()]);
    }

    #[test]
    fn header_reservation_throttled_by_window() {
        let queue =
            DownloadQueue::builder().with_max_header_fetch(4).with_block_cache_items(8).build();
        let headers = random_header_range(9..13, H256::ZERO);
        let _completed = queue.schedule_skeleton(9, vec![headers[3].clone()]);

        assert_matches!(queue.reserve_headers(&peer("peer")), HeaderReservation::Throttled);
        assert_eq!(queue.pending_headers(), 1);

        queue.prepare(8, SyncMode::Full);
        assert_matches!(queue.reserve_headers(&peer("peer")), HeaderReservation::Reserved(_));
    }

    #[test]
    fn expired_header_requests_are_requeued() {
        let (queue, headers) = skeleton_queue();
        let _completed = queue.schedule_skeleton(1, vec![headers[3].clone()]);
        let peer = peer("slow");
        queue.reserve_headers(&peer).into_request().unwrap();
        assert_eq!(queue.pending_headers(), 0);

        std::thread::sleep(Duration::from_millis(2));
        let expired = queue.expire_headers(Duration::ZERO);
        assert_eq!(expired.get(peer.peer_id()), Some(&0));
        assert_eq!(queue.pending_headers(), 1);
        assert!(!queue.in_flight_headers());
    }
}
