use crate::{
    announce::{Announce, QueuedBlock},
    builder::FetcherBuilder,
    handle::{FetcherCommand, FetcherHandle},
    import::import_block,
    metrics::FetcherMetrics,
};
use chainsync_interfaces::{
    chain::Chain,
    p2p::{broadcast::BlockBroadcaster, downloader::DownloadClient, peer::PeerSession},
};
use chainsync_primitives::{BlockBody, BlockNumber, PeerId, SealedBlock, SealedHeader, H256};
use chainsync_tasks::{shutdown::Shutdown, TaskSpawner};
use chainsync_tracing::throttle;
use rand::{seq::SliceRandom, thread_rng};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};

/// Minimum delay between two fetch rounds.
const MIN_FETCH_INTERVAL: Duration = Duration::from_millis(200);

/// Minimum delay between two completion rounds.
const MIN_COMPLETE_INTERVAL: Duration = Duration::from_millis(100);

/// Accumulates block announcements from peers and schedules their retrieval and import.
///
/// Every announced hash moves through mutually exclusive states: `announced` until it was waited
/// on long enough, `fetching` while its header is requested, `fetched` until a body request goes
/// out, `completing` while its body is requested and finally queued for import. A header whose
/// body is provably empty skips the body round trip.
///
/// All state is owned by the [`Fetcher::run`] loop. Requests to peers and block imports run on
/// spawned tasks and report back through channels, so no locking is needed.
#[must_use = "Fetcher does nothing unless run"]
pub struct Fetcher<C, B, D> {
    config: FetcherBuilder,
    chain: Arc<C>,
    broadcaster: Arc<B>,
    client: Arc<D>,
    spawner: Box<dyn TaskSpawner>,
    shutdown: Shutdown,

    /// Copy of the sender half, so new [`FetcherHandle`]s can be created on demand.
    command_tx: mpsc::UnboundedSender<FetcherCommand>,
    /// Incoming commands from [`FetcherHandle`]s.
    command_rx: mpsc::UnboundedReceiver<FetcherCommand>,
    /// Sender half handed to the import tasks.
    done_tx: mpsc::UnboundedSender<H256>,
    /// Hashes of the finished imports.
    done_rx: mpsc::UnboundedReceiver<H256>,

    /// Per peer announce counts to prevent memory exhaustion.
    announces: HashMap<PeerId, usize>,
    /// Announced blocks, scheduled for fetching.
    announced: HashMap<H256, Vec<Announce>>,
    /// Announced blocks, currently fetching the header.
    fetching: HashMap<H256, Announce>,
    /// Blocks with headers fetched, scheduled for body retrieval.
    fetched: HashMap<H256, Vec<Announce>>,
    /// Blocks with headers, currently fetching the body.
    completing: HashMap<H256, Announce>,
    /// Header requests sent per hash.
    header_attempts: HashMap<H256, usize>,
    /// Body requests sent per hash.
    body_attempts: HashMap<H256, usize>,
    /// Announcers to retry a timed out request against.
    fallbacks: HashMap<H256, Vec<Announce>>,

    /// Import operations, lowest block number first.
    queue: BinaryHeap<Reverse<(BlockNumber, H256)>>,
    /// Per peer queued block counts to prevent memory exhaustion.
    queues: HashMap<PeerId, usize>,
    /// Queued blocks, to dedupe imports.
    queued: HashMap<H256, QueuedBlock>,

    /// When the next fetch round is due.
    fetch_deadline: Option<Instant>,
    /// When the next completion round is due.
    complete_deadline: Option<Instant>,

    metrics: FetcherMetrics,
}

// === impl Fetcher ===

impl<C, B, D> Fetcher<C, B, D>
where
    C: Chain + 'static,
    B: BlockBroadcaster + 'static,
    D: DownloadClient + 'static,
{
    pub(crate) fn new(
        config: FetcherBuilder,
        chain: C,
        broadcaster: B,
        client: D,
        spawner: Box<dyn TaskSpawner>,
        shutdown: Shutdown,
        metrics: FetcherMetrics,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            config,
            chain: Arc::new(chain),
            broadcaster: Arc::new(broadcaster),
            client: Arc::new(client),
            spawner,
            shutdown,
            command_tx,
            command_rx,
            done_tx,
            done_rx,
            announces: Default::default(),
            announced: Default::default(),
            fetching: Default::default(),
            fetched: Default::default(),
            completing: Default::default(),
            header_attempts: Default::default(),
            body_attempts: Default::default(),
            fallbacks: Default::default(),
            queue: Default::default(),
            queues: Default::default(),
            queued: Default::default(),
            fetch_deadline: None,
            complete_deadline: None,
            metrics,
        }
    }

    /// Returns a new [`FetcherHandle`] connected to this fetcher.
    pub fn handle(&self) -> FetcherHandle {
        FetcherHandle::new(self.command_tx.clone(), self.shutdown.clone())
    }

    /// Spawns the event loop through the fetcher's [`TaskSpawner`].
    pub fn spawn(self) -> JoinHandle<()> {
        let spawner = self.spawner.clone();
        spawner.spawn_critical_task("block fetcher", Box::pin(self.run()))
    }

    /// Runs the event loop until the shutdown signal fires.
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let now = Instant::now();
            self.expire_fetches(now);
            self.expire_completions(now);
            self.import_queued();

            let expiry = self.next_expiry();
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    debug!(target: "sync::fetcher", "Fetcher terminating");
                    return
                }
                Some(command) = self.command_rx.recv() => self.on_command(command),
                Some(hash) = self.done_rx.recv() => self.on_import_done(hash),
                _ = wait_until(self.fetch_deadline) => self.on_fetch_timer(Instant::now()),
                _ = wait_until(self.complete_deadline) => self.on_complete_timer(Instant::now()),
                _ = wait_until(expiry) => {}
            }
        }
    }

    fn on_command(&mut self, command: FetcherCommand) {
        match command {
            FetcherCommand::Notify(announce) => self.on_notify(announce),
            FetcherCommand::Inject { origin, block } => self.on_inject(origin, block),
            FetcherCommand::FilterHeaders { peer_id, headers, time, tx } => {
                let unknown = self.filter_headers(&peer_id, headers, time);
                let _ = tx.send(unknown);
            }
            FetcherCommand::FilterBodies { peer_id, bodies, time, tx } => {
                let unknown = self.filter_bodies(&peer_id, bodies, time);
                let _ = tx.send(unknown);
            }
        }
    }

    /// Whether the block is already part of the local chain.
    fn is_known(&self, hash: H256) -> bool {
        self.chain.has_block(hash)
    }

    fn track(&mut self, peer_id: &PeerId) {
        *self.announces.entry(peer_id.clone()).or_default() += 1;
    }

    fn untrack(&mut self, peer_id: &PeerId) {
        if let Some(count) = self.announces.get_mut(peer_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.announces.remove(peer_id);
            }
        }
    }

    /// A block was announced.
    fn on_notify(&mut self, announce: Announce) {
        self.metrics.announces_in.increment(1);
        let origin = announce.origin().clone();
        let hash = announce.hash;

        let count = self.announces.get(&origin).copied().unwrap_or_default() + 1;
        if count > self.config.hash_limit {
            debug!(target: "sync::fetcher", peer_id = %origin, limit = self.config.hash_limit, "Peer exceeded outstanding announces");
            self.metrics.announces_dos.increment(1);
            return
        }

        if announce.number > 0 {
            let dist = announce.number as i128 - self.chain.current_height() as i128;
            if dist < -(self.config.max_uncle_dist as i128) ||
                dist > self.config.max_queue_dist as i128
            {
                debug!(target: "sync::fetcher", peer_id = %origin, number = announce.number, ?hash, dist, "Peer discarded announcement");
                self.metrics.announces_dropped.increment(1);
                return
            }
        }

        if let Some(fallbacks) = self.fallbacks.get_mut(&hash) {
            if fallbacks.len() < self.config.max_fallback_announcers {
                fallbacks.push(announce.clone());
            }
        }

        if self.fetching.contains_key(&hash) ||
            self.completing.contains_key(&hash) ||
            self.queued.contains_key(&hash)
        {
            return
        }

        let announcers = self.announced.get(&hash).map_or(0, Vec::len);
        if announcers >= self.config.max_announcers_per_hash {
            debug!(target: "sync::fetcher", peer_id = %origin, ?hash, announcers, "Too many announcers for hash, discarding");
            return
        }

        self.track(&origin);
        self.announced.entry(hash).or_default().push(announce);
        if self.announced.len() == 1 {
            self.reschedule_fetch(Instant::now());
        }
    }

    /// A block was propagated to us.
    fn on_inject(&mut self, origin: PeerId, block: SealedBlock) {
        self.metrics.broadcasts_in.increment(1);
        if self.queued.len() < self.config.max_queued_injections {
            self.enqueue(origin, block, Instant::now());
        } else {
            throttle!(Duration::from_secs(1), || {
                debug!(target: "sync::fetcher", peer_id = %origin, queued = self.queued.len(), "Import queue full, dropping propagated block")
            });
        }
    }

    fn on_import_done(&mut self, hash: H256) {
        self.forget_hash(hash);
        self.forget_block(hash);
    }

    /// Promotes every announcement that waited long enough to a header fetch.
    fn on_fetch_timer(&mut self, now: Instant) {
        let wait = self.config.arrive_timeout.saturating_sub(self.config.gather_slack);
        let due: Vec<H256> = self
            .announced
            .iter()
            .filter(|(_, announces)| {
                announces.first().map_or(false, |first| now.duration_since(first.time) > wait)
            })
            .map(|(hash, _)| *hash)
            .collect();

        let mut requests: HashMap<PeerId, (Arc<dyn PeerSession>, Vec<(H256, BlockNumber)>)> =
            HashMap::new();
        for hash in due {
            let Some(announces) = self.announced.get(&hash).cloned() else { continue };
            let Some(announce) = announces.choose(&mut thread_rng()).cloned() else { continue };
            self.fallbacks.insert(hash, announces);
            self.forget_hash(hash);

            if self.is_known(hash) {
                self.forget_retries(hash);
                continue
            }
            if self.queued.contains_key(&hash) {
                trace!(target: "sync::fetcher", ?hash, "Announced block already queued");
                self.forget_retries(hash);
                continue
            }

            requests
                .entry(announce.origin().clone())
                .or_insert_with(|| (Arc::clone(&announce.peer), Vec::new()))
                .1
                .push((hash, announce.number));
            self.track(announce.origin());
            self.fetching.insert(hash, Announce { time: now, ..announce });
            self.header_attempts.insert(hash, 1);
        }

        for (peer_id, (peer, hashes)) in requests {
            trace!(target: "sync::fetcher", %peer_id, count = hashes.len(), "Fetching scheduled headers");
            self.request_headers(peer, hashes);
        }
        self.reschedule_fetch(now);
    }

    /// Promotes every fetched header to a body request.
    fn on_complete_timer(&mut self, now: Instant) {
        let due: Vec<H256> = self
            .fetched
            .keys()
            .filter(|hash| !self.body_attempts.contains_key(*hash))
            .copied()
            .collect();

        let mut requests: HashMap<PeerId, (Arc<dyn PeerSession>, Vec<H256>)> = HashMap::new();
        for hash in due {
            let Some(announce) =
                self.fetched.get(&hash).and_then(|announces| announces.choose(&mut thread_rng()))
            else {
                continue
            };
            let announce = announce.clone();
            self.forget_hash(hash);

            if self.is_known(hash) || self.queued.contains_key(&hash) {
                self.forget_retries(hash);
                continue
            }

            requests
                .entry(announce.origin().clone())
                .or_insert_with(|| (Arc::clone(&announce.peer), Vec::new()))
                .1
                .push(hash);
            self.track(announce.origin());
            self.completing.insert(hash, Announce { time: now, ..announce });
            self.body_attempts.insert(hash, 1);
        }

        for (peer_id, (peer, hashes)) in requests {
            trace!(target: "sync::fetcher", %peer_id, count = hashes.len(), "Fetching scheduled bodies");
            self.request_bodies(peer, hashes);
        }
        self.reschedule_complete(now);
    }

    /// Retries or abandons the header requests that timed out.
    fn expire_fetches(&mut self, now: Instant) {
        let timeout = self.config.fetch_timeout;
        let expired: Vec<H256> = self
            .fetching
            .iter()
            .filter(|(_, announce)| now.saturating_duration_since(announce.time) > timeout)
            .map(|(hash, _)| *hash)
            .collect();

        for hash in expired {
            trace!(target: "sync::fetcher", ?hash, "Header fetch timed out");
            if self.is_known(hash) || self.queued.contains_key(&hash) {
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            }

            let attempts = self.header_attempts.get(&hash).copied().unwrap_or_default();
            if attempts >= self.config.max_fetch_attempts || attempts == 0 {
                debug!(target: "sync::fetcher", ?hash, attempts, "Abandoning header fetch");
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            }

            let failed = self.fetching.get(&hash).map(|announce| announce.origin().clone());
            let Some(retry) = self.pick_fallback(hash, failed.as_ref()) else {
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            };
            if let Some(previous) = self.fetching.remove(&hash) {
                self.untrack(previous.origin());
            }
            self.track(retry.origin());
            self.header_attempts.insert(hash, attempts + 1);
            trace!(target: "sync::fetcher", ?hash, peer_id = %retry.origin(), attempt = attempts + 1, "Retrying header fetch");

            self.request_headers(Arc::clone(&retry.peer), vec![(hash, retry.number)]);
            self.fetching.insert(hash, Announce { time: now, ..retry });
        }
    }

    /// Retries or abandons the body requests that timed out.
    fn expire_completions(&mut self, now: Instant) {
        let timeout = self.config.fetch_timeout * 3;
        let expired: Vec<H256> = self
            .completing
            .iter()
            .filter(|(_, announce)| now.saturating_duration_since(announce.time) > timeout)
            .map(|(hash, _)| *hash)
            .collect();

        for hash in expired {
            trace!(target: "sync::fetcher", ?hash, "Body fetch timed out");
            if self.is_known(hash) || self.queued.contains_key(&hash) {
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            }

            let attempts = self.body_attempts.get(&hash).copied().unwrap_or_default();
            if attempts >= self.config.max_fetch_attempts || attempts == 0 {
                debug!(target: "sync::fetcher", ?hash, attempts, "Abandoning body fetch");
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            }

            let failed = self.completing.get(&hash).map(|announce| announce.origin().clone());
            let Some(retry) = self.pick_fallback(hash, failed.as_ref()) else {
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            };
            let Some(previous) = self.completing.remove(&hash) else { continue };
            self.untrack(previous.origin());
            self.track(retry.origin());
            self.body_attempts.insert(hash, attempts + 1);
            trace!(target: "sync::fetcher", ?hash, peer_id = %retry.origin(), attempt = attempts + 1, "Retrying body fetch");

            self.request_bodies(Arc::clone(&retry.peer), vec![hash]);
            self.completing.insert(hash, Announce { time: now, header: previous.header, ..retry });
        }
    }

    /// Picks a random fallback announcer, avoiding the peer that just timed out if possible.
    fn pick_fallback(&self, hash: H256, failed: Option<&PeerId>) -> Option<Announce> {
        let fallbacks = self.fallbacks.get(&hash)?;
        let others: Vec<&Announce> =
            fallbacks.iter().filter(|announce| Some(announce.origin()) != failed).collect();
        match others.choose(&mut thread_rng()) {
            Some(announce) => Some((*announce).clone()),
            None => fallbacks.choose(&mut thread_rng()).cloned(),
        }
    }

    /// Imports every queued block that could fit on top of the chain.
    fn import_queued(&mut self) {
        let height = self.chain.current_height();
        while let Some(Reverse((number, hash))) = self.queue.peek().copied() {
            if number > height + 1 {
                break
            }
            self.queue.pop();

            let Some(queued) = self.queued.get(&hash) else { continue };
            if number + self.config.max_uncle_dist < height || self.is_known(hash) {
                trace!(target: "sync::fetcher", number, ?hash, height, "Discarding stale queued block");
                self.forget_block(hash);
                continue
            }
            let queued = queued.clone();
            self.insert(queued);
        }
    }

    /// Spawns the import of the block, reporting back once done.
    fn insert(&self, queued: QueuedBlock) {
        let hash = queued.block.hash();
        debug!(target: "sync::fetcher", peer_id = %queued.origin, number = queued.block.number(), ?hash, "Importing propagated block");

        let chain = Arc::clone(&self.chain);
        let broadcaster = Arc::clone(&self.broadcaster);
        let client = Arc::clone(&self.client);
        let metrics = self.metrics.clone();
        let done = self.done_tx.clone();
        self.spawner.spawn_task(Box::pin(async move {
            import_block(&*chain, &*broadcaster, &*client, &metrics, queued);
            let _ = done.send(hash);
        }));
    }

    fn request_headers(&self, peer: Arc<dyn PeerSession>, hashes: Vec<(H256, BlockNumber)>) {
        let metrics = self.metrics.clone();
        self.spawner.spawn_task(Box::pin(async move {
            for (hash, number) in hashes {
                metrics.header_fetches.increment(1);
                if let Err(err) = peer.request_one_header(hash, number).await {
                    debug!(target: "sync::fetcher", peer_id = %peer.peer_id(), ?hash, %err, "Failed to request header");
                }
            }
        }));
    }

    fn request_bodies(&self, peer: Arc<dyn PeerSession>, hashes: Vec<H256>) {
        self.metrics.body_fetches.increment(hashes.len() as u64);
        self.spawner.spawn_task(Box::pin(async move {
            if let Err(err) = peer.request_bodies(hashes).await {
                debug!(target: "sync::fetcher", peer_id = %peer.peer_id(), %err, "Failed to request bodies");
            }
        }));
    }

    /// Extracts the headers requested by the fetcher and returns all others.
    fn filter_headers(
        &mut self,
        peer_id: &PeerId,
        headers: Vec<SealedHeader>,
        time: Instant,
    ) -> Vec<SealedHeader> {
        self.metrics.header_filter_in.increment(headers.len() as u64);

        let mut unknown = Vec::new();
        let mut incomplete = Vec::new();
        let mut complete = Vec::new();
        for header in headers {
            let hash = header.hash();
            let requested = self.fetching.get(&hash).map_or(false, |announce| {
                announce.origin() == peer_id &&
                    !self.fetched.contains_key(&hash) &&
                    !self.completing.contains_key(&hash) &&
                    !self.queued.contains_key(&hash)
            });
            if !requested {
                unknown.push(header);
                continue
            }
            let Some(mut announce) = self.fetching.remove(&hash) else { continue };

            // announcements without a number accept whatever the header says
            if announce.number != 0 && header.number != announce.number {
                debug!(target: "sync::fetcher", %peer_id, ?hash, announced = announce.number, provided = header.number, "Invalid block number fetched");
                self.client.drop_peer(peer_id);
                self.untrack(announce.origin());
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            }
            self.header_attempts.remove(&hash);

            if self.is_known(hash) {
                trace!(target: "sync::fetcher", %peer_id, number = header.number, ?hash, "Block already imported, discarding header");
                self.untrack(announce.origin());
                self.forget_hash(hash);
                self.forget_retries(hash);
                continue
            }

            announce.number = header.number;
            announce.time = time;
            if header.is_empty_body() {
                trace!(target: "sync::fetcher", %peer_id, number = header.number, ?hash, "Block empty, skipping body retrieval");
                self.untrack(announce.origin());
                complete.push((announce.origin().clone(), SealedBlock::with_header(header)));
                continue
            }
            announce.header = Some(header);
            incomplete.push(announce);
        }

        self.metrics.header_filter_out.increment(unknown.len() as u64);

        for announce in incomplete {
            let hash = announce.hash;
            self.fetched.entry(hash).or_default().push(announce);
            if self.fetched.len() == 1 {
                self.reschedule_complete(Instant::now());
            }
        }
        for (origin, block) in complete {
            let hash = block.hash();
            self.enqueue(origin, block, time);
            self.forget_retries(hash);
        }
        unknown
    }

    /// Matches the bodies against the outstanding body requests and returns the unmatched ones.
    fn filter_bodies(
        &mut self,
        peer_id: &PeerId,
        bodies: Vec<BlockBody>,
        time: Instant,
    ) -> Vec<BlockBody> {
        self.metrics.body_filter_in.increment(bodies.len() as u64);
        let height = self.chain.current_height();

        let mut unmatched = Vec::new();
        let mut blocks = Vec::new();
        for body in bodies {
            let mut matched = None;
            let mut stale = Vec::new();
            for (hash, announce) in &self.completing {
                if self.queued.contains_key(hash) {
                    continue
                }
                let Some(header) = &announce.header else {
                    stale.push(*hash);
                    continue
                };
                if announce.origin() == peer_id && body.matches_header(header) {
                    matched = Some((*hash, header.clone()));
                    break
                }
                if header.number <= height ||
                    header.number > height.saturating_add(self.config.max_queue_dist)
                {
                    stale.push(*hash);
                }
            }
            for hash in stale {
                trace!(target: "sync::fetcher", ?hash, height, "Dropping body request out of range");
                self.forget_hash(hash);
                self.forget_retries(hash);
            }

            match matched {
                Some((hash, header)) => {
                    if self.is_known(hash) {
                        self.forget_hash(hash);
                        self.forget_retries(hash);
                    } else {
                        blocks.push(SealedBlock::new(header, body));
                    }
                }
                None => unmatched.push(body),
            }
        }

        self.metrics.body_filter_out.increment(unmatched.len() as u64);

        for block in blocks {
            let hash = block.hash();
            let Some(origin) = self.completing.get(&hash).map(|announce| announce.origin().clone())
            else {
                continue
            };
            self.enqueue(origin, block, time);
            self.forget_hash(hash);
            self.forget_retries(hash);
        }
        unmatched
    }

    /// Schedules a block for import, unless the peer exceeded its allowance.
    fn enqueue(&mut self, origin: PeerId, block: SealedBlock, received: Instant) {
        let hash = block.hash();
        let count = self.queues.get(&origin).copied().unwrap_or_default() + 1;
        if count > self.config.block_limit {
            debug!(target: "sync::fetcher", peer_id = %origin, number = block.number(), ?hash, limit = self.config.block_limit, "Discarded propagated block, exceeded allowance");
            self.metrics.broadcasts_dos.increment(1);
            self.forget_hash(hash);
            return
        }

        if self.queued.contains_key(&hash) {
            return
        }
        let number = block.number();
        self.queues.insert(origin.clone(), count);
        self.queued.insert(hash, QueuedBlock { origin: origin.clone(), block, received });
        self.queue.push(Reverse((number, hash)));
        debug!(target: "sync::fetcher", peer_id = %origin, number, ?hash, queued = self.queue.len(), "Queued propagated block");
    }

    /// Arms the fetch timer for the earliest announcement, disarms it if there is none.
    fn reschedule_fetch(&mut self, now: Instant) {
        let earliest = earliest_announce(self.announced.values());
        self.fetch_deadline =
            earliest.map(|earliest| self.next_round(now, earliest, MIN_FETCH_INTERVAL));
    }

    /// Arms the completion timer for the earliest fetched header, disarms it if there is none.
    fn reschedule_complete(&mut self, now: Instant) {
        let earliest = earliest_announce(self.fetched.values());
        self.complete_deadline =
            earliest.map(|earliest| self.next_round(now, earliest, MIN_COMPLETE_INTERVAL));
    }

    fn next_round(&self, now: Instant, earliest: Instant, min_interval: Duration) -> Instant {
        let waited = now.saturating_duration_since(earliest);
        now + self.config.arrive_timeout.saturating_sub(waited).max(min_interval)
    }

    /// When the oldest outstanding request times out.
    fn next_expiry(&self) -> Option<Instant> {
        let headers =
            self.fetching.values().map(|announce| announce.time + self.config.fetch_timeout);
        let bodies =
            self.completing.values().map(|announce| announce.time + self.config.fetch_timeout * 3);
        headers.chain(bodies).min().map(|deadline| deadline + Duration::from_millis(1))
    }

    /// Removes all traces of an announcement, releasing the announcers' allowance.
    fn forget_hash(&mut self, hash: H256) {
        let mut origins = Vec::new();
        if let Some(announces) = self.announced.remove(&hash) {
            origins.extend(announces.iter().map(|announce| announce.origin().clone()));
        }
        if let Some(announce) = self.fetching.remove(&hash) {
            origins.push(announce.origin().clone());
        }
        if let Some(announces) = self.fetched.remove(&hash) {
            origins.extend(announces.iter().map(|announce| announce.origin().clone()));
        }
        if let Some(announce) = self.completing.remove(&hash) {
            origins.push(announce.origin().clone());
        }
        for origin in origins {
            self.untrack(&origin);
        }
    }

    /// Removes the retry bookkeeping of a hash.
    fn forget_retries(&mut self, hash: H256) {
        self.header_attempts.remove(&hash);
        self.body_attempts.remove(&hash);
        self.fallbacks.remove(&hash);
    }

    /// Removes a queued block, releasing the origin's allowance.
    fn forget_block(&mut self, hash: H256) {
        if let Some(queued) = self.queued.remove(&hash) {
            if let Some(count) = self.queues.get_mut(&queued.origin) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.queues.remove(&queued.origin);
                }
            }
        }
    }
}

impl<C, B, D> fmt::Debug for Fetcher<C, B, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .field("announced", &self.announced.len())
            .field("fetching", &self.fetching.len())
            .field("fetched", &self.fetched.len())
            .field("completing", &self.completing.len())
            .field("queued", &self.queued.len())
            .finish_non_exhaustive()
    }
}

fn earliest_announce<'a>(announces: impl Iterator<Item = &'a Vec<Announce>>) -> Option<Instant> {
    announces.filter_map(|announces| announces.first()).map(|announce| announce.time).min()
}

/// Resolves at the deadline, never if there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetcherError, FETCH_TIMEOUT, HASH_LIMIT, MAX_FETCH_ATTEMPTS};
    use assert_matches::assert_matches;
    use chainsync_interfaces::test_utils::{
        generators::{empty_header, random_block, random_block_range, random_hash},
        PeerRequest, TestBroadcaster, TestChain, TestDownloadClient, TestPeer,
    };
    use chainsync_tasks::{
        shutdown::{signal, Signal},
        TokioTaskExecutor,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    type TestFetcher = Fetcher<Arc<TestChain>, TestBroadcaster, Arc<TestDownloadClient>>;

    struct Harness {
        fetcher: TestFetcher,
        chain: Arc<TestChain>,
        client: Arc<TestDownloadClient>,
        broadcasts: UnboundedReceiver<(H256, bool)>,
        _signal: Signal,
    }

    /// A fetcher on top of a chain of ten empty blocks.
    fn harness(builder: FetcherBuilder) -> Harness {
        let chain = Arc::new(TestChain::with_blocks(random_block_range(0..11, H256::ZERO, 0..1)));
        let client = Arc::new(TestDownloadClient::new(1));
        let (broadcaster, broadcasts) = TestBroadcaster::new();
        let (signal, shutdown) = signal();
        let fetcher = builder.build(
            Arc::clone(&chain),
            broadcaster,
            Arc::clone(&client),
            TokioTaskExecutor::default().boxed(),
            shutdown,
        );
        Harness { fetcher, chain, client, broadcasts, _signal: signal }
    }

    fn head(chain: &TestChain) -> SealedHeader {
        chain.header_by_number(chain.current_height()).unwrap()
    }

    fn session(peer: &Arc<TestPeer>) -> Arc<dyn PeerSession> {
        Arc::clone(peer) as Arc<dyn PeerSession>
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn header_requests(peer: &TestPeer) -> usize {
        peer.requests()
            .iter()
            .filter(|request| matches!(request, PeerRequest::OneHeader { .. }))
            .count()
    }

    fn is_forgotten(fetcher: &TestFetcher, hash: &H256) -> bool {
        !fetcher.announced.contains_key(hash) &&
            !fetcher.fetching.contains_key(hash) &&
            !fetcher.fetched.contains_key(hash) &&
            !fetcher.completing.contains_key(hash) &&
            !fetcher.header_attempts.contains_key(hash) &&
            !fetcher.body_attempts.contains_key(hash) &&
            !fetcher.fallbacks.contains_key(hash)
    }

    #[tokio::test]
    async fn announcement_dos_cap() {
        let Harness { mut fetcher, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("spammer")));
        let now = Instant::now();

        for _ in 0..HASH_LIMIT {
            fetcher.on_notify(Announce::new(Arc::clone(&peer), random_hash(), 0, now));
        }
        assert_eq!(fetcher.announced.len(), HASH_LIMIT);
        assert_eq!(fetcher.announces[peer.peer_id()], HASH_LIMIT);

        let hash = random_hash();
        fetcher.on_notify(Announce::new(Arc::clone(&peer), hash, 0, now));
        assert_eq!(fetcher.announced.len(), HASH_LIMIT);
        assert!(!fetcher.announced.contains_key(&hash));

        // other peers are unaffected
        let other = session(&Arc::new(TestPeer::new("honest")));
        fetcher.on_notify(Announce::new(other, hash, 0, now));
        assert!(fetcher.announced.contains_key(&hash));
    }

    #[tokio::test]
    async fn announcement_distance_filter() {
        let Harness { mut fetcher, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("peer")));
        let now = Instant::now();

        // head is at 10
        for (number, accepted) in [(2, false), (3, true), (42, true), (43, false)] {
            let hash = random_hash();
            fetcher.on_notify(Announce::new(Arc::clone(&peer), hash, number, now));
            assert_eq!(fetcher.announced.contains_key(&hash), accepted, "number {number}");
        }
    }

    #[tokio::test]
    async fn announcers_per_hash_are_capped() {
        let Harness { mut fetcher, .. } =
            harness(FetcherBuilder::default().with_max_announcers_per_hash(2));
        let hash = random_hash();
        let now = Instant::now();

        for id in ["a", "b", "c"] {
            let peer = session(&Arc::new(TestPeer::new(id)));
            fetcher.on_notify(Announce::new(peer, hash, 11, now));
        }
        assert_eq!(fetcher.announced[&hash].len(), 2);
        assert!(!fetcher.announces.contains_key(&PeerId::from("c")));
    }

    #[tokio::test]
    async fn fetch_timer_waits_for_arrive_timeout() {
        let Harness { mut fetcher, .. } = harness(FetcherBuilder::default());
        let peer = Arc::new(TestPeer::new("peer"));
        let hash = random_hash();
        let now = Instant::now();

        fetcher.on_notify(Announce::new(session(&peer), hash, 11, now));
        assert!(fetcher.fetch_deadline.is_some());

        fetcher.on_fetch_timer(now + Duration::from_millis(100));
        assert!(fetcher.announced.contains_key(&hash));

        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        assert!(fetcher.fetching.contains_key(&hash));
        assert!(!fetcher.announced.contains_key(&hash));
        assert_eq!(fetcher.header_attempts[&hash], 1);
        assert!(fetcher.fetch_deadline.is_none());

        settle().await;
        assert_eq!(peer.requests(), vec![PeerRequest::OneHeader { hash, number: 11 }]);
    }

    #[tokio::test]
    async fn retry_bound_forgets_hash() {
        chainsync_tracing::init_test_tracing();
        let Harness { mut fetcher, .. } = harness(FetcherBuilder::default());
        let peers: Vec<_> = ["a", "b", "c"].map(|id| Arc::new(TestPeer::new(id))).into();
        let hash = random_hash();
        let start = Instant::now();

        for peer in &peers {
            fetcher.on_notify(Announce::new(session(peer), hash, 11, start));
        }
        let mut now = start + Duration::from_secs(1);
        fetcher.on_fetch_timer(now);
        assert_eq!(fetcher.header_attempts[&hash], 1);

        for attempt in 2..=MAX_FETCH_ATTEMPTS {
            now += FETCH_TIMEOUT + Duration::from_secs(1);
            fetcher.expire_fetches(now);
            assert_eq!(fetcher.header_attempts[&hash], attempt);
            assert!(fetcher.fetching.contains_key(&hash));
        }

        now += FETCH_TIMEOUT + Duration::from_secs(1);
        fetcher.expire_fetches(now);
        assert!(is_forgotten(&fetcher, &hash));
        assert!(fetcher.announces.is_empty());
        assert_eq!(fetcher.next_expiry(), None);
        assert_eq!(fetcher.fetch_deadline, None);

        settle().await;
        let sent: usize = peers.iter().map(|peer| header_requests(peer)).sum();
        assert_eq!(sent, MAX_FETCH_ATTEMPTS);
    }

    #[tokio::test]
    async fn unrequested_headers_are_returned() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("peer")));
        let block = random_block(11, Some(head(&chain).hash()), Some(1));
        let now = Instant::now();

        let returned = fetcher.filter_headers(peer.peer_id(), vec![block.header.clone()], now);
        assert_eq!(returned, vec![block.header.clone()]);
        assert!(is_forgotten(&fetcher, &block.hash()));
        assert!(fetcher.queued.is_empty());

        // requested, but from another peer
        fetcher.on_notify(Announce::new(Arc::clone(&peer), block.hash(), 11, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        let returned =
            fetcher.filter_headers(&PeerId::from("other"), vec![block.header.clone()], now);
        assert_eq!(returned.len(), 1);
        assert!(fetcher.fetching.contains_key(&block.hash()));
    }

    #[tokio::test]
    async fn mismatching_number_drops_peer() {
        chainsync_tracing::init_test_tracing();
        let Harness { mut fetcher, chain, client, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("liar")));
        let block = random_block(11, Some(head(&chain).hash()), Some(1));
        let now = Instant::now();

        fetcher.on_notify(Announce::new(Arc::clone(&peer), block.hash(), 12, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        let returned = fetcher.filter_headers(peer.peer_id(), vec![block.header.clone()], now);
        assert!(returned.is_empty());
        assert_eq!(client.dropped(), vec![PeerId::from("liar")]);
        assert!(is_forgotten(&fetcher, &block.hash()));
        assert!(fetcher.announces.is_empty());
    }

    #[tokio::test]
    async fn unnumbered_announcement_accepts_header() {
        let Harness { mut fetcher, chain, client, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("honest")));
        let block = random_block(11, Some(head(&chain).hash()), Some(1));
        let hash = block.hash();
        let now = Instant::now();

        fetcher.on_notify(Announce::new(Arc::clone(&peer), hash, 0, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        assert!(fetcher.filter_headers(peer.peer_id(), vec![block.header.clone()], now).is_empty());

        assert!(client.dropped().is_empty());
        assert_eq!(fetcher.fetched[&hash][0].number, 11);
    }

    #[tokio::test]
    async fn imported_header_forgets_retries() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("peer")));
        let block = random_block(11, Some(head(&chain).hash()), Some(1));
        let hash = block.hash();
        let now = Instant::now();

        fetcher.on_notify(Announce::new(Arc::clone(&peer), hash, 11, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        assert!(fetcher.fallbacks.contains_key(&hash));

        chain.insert_chain(vec![block.clone()]).unwrap();
        assert!(fetcher.filter_headers(peer.peer_id(), vec![block.header.clone()], now).is_empty());
        assert!(is_forgotten(&fetcher, &hash));
        assert!(fetcher.announces.is_empty());
    }

    /// Drives an announced block up to its body request.
    fn complete_header(
        fetcher: &mut TestFetcher,
        peer: &Arc<dyn PeerSession>,
        block: &SealedBlock,
    ) {
        let now = Instant::now();
        fetcher.on_notify(Announce::new(Arc::clone(peer), block.hash(), block.number(), now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        fetcher.filter_headers(peer.peer_id(), vec![block.header.clone()], now);
        fetcher.on_complete_timer(now + Duration::from_secs(1));
        assert!(fetcher.completing.contains_key(&block.hash()));
    }

    #[tokio::test]
    async fn out_of_range_body_request_forgets_retries() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("peer")));
        let block = random_block(11, Some(head(&chain).hash()), Some(2));
        complete_header(&mut fetcher, &peer, &block);

        // the chain moved past the block while its body was requested
        chain.insert_chain(vec![block.clone()]).unwrap();
        let other = random_block(12, Some(block.hash()), Some(1));
        let returned =
            fetcher.filter_bodies(&PeerId::from("other"), vec![other.body.clone()], Instant::now());
        assert_eq!(returned, vec![other.body]);
        assert!(is_forgotten(&fetcher, &block.hash()));
        assert!(fetcher.announces.is_empty());
    }

    #[tokio::test]
    async fn imported_body_forgets_retries() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let peer = session(&Arc::new(TestPeer::new("peer")));
        let block = random_block(11, Some(head(&chain).hash()), Some(2));
        complete_header(&mut fetcher, &peer, &block);

        chain.insert_chain(vec![block.clone()]).unwrap();
        let returned =
            fetcher.filter_bodies(peer.peer_id(), vec![block.body.clone()], Instant::now());
        assert!(returned.is_empty());
        assert!(is_forgotten(&fetcher, &block.hash()));
        assert!(fetcher.queued.is_empty());
    }

    #[tokio::test]
    async fn retry_avoids_timed_out_announcer() {
        let Harness { mut fetcher, .. } = harness(FetcherBuilder::default());
        let hash = random_hash();
        let start = Instant::now();
        for id in ["a", "b"] {
            let peer = session(&Arc::new(TestPeer::new(id)));
            fetcher.on_notify(Announce::new(peer, hash, 11, start));
        }

        let mut now = start + Duration::from_secs(1);
        fetcher.on_fetch_timer(now);
        for _ in 1..MAX_FETCH_ATTEMPTS {
            let failed = fetcher.fetching[&hash].origin().clone();
            now += FETCH_TIMEOUT + Duration::from_secs(1);
            fetcher.expire_fetches(now);
            assert_ne!(fetcher.fetching[&hash].origin(), &failed);
        }
    }

    #[tokio::test]
    async fn empty_body_short_circuits() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let peer = Arc::new(TestPeer::new("peer"));
        let header = empty_header(11, head(&chain).hash());
        let hash = header.hash();
        let now = Instant::now();

        fetcher.on_notify(Announce::new(session(&peer), hash, 11, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        let returned = fetcher.filter_headers(peer.peer_id(), vec![header], now);
        assert!(returned.is_empty());

        assert!(fetcher.queued.contains_key(&hash));
        assert!(is_forgotten(&fetcher, &hash));
        assert!(fetcher.complete_deadline.is_none());

        settle().await;
        assert!(!peer.requests().iter().any(|request| matches!(request, PeerRequest::Bodies(_))));
    }

    #[tokio::test]
    async fn body_completes_block() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let peer = Arc::new(TestPeer::new("peer"));
        let block = random_block(11, Some(head(&chain).hash()), Some(2));
        let hash = block.hash();
        let now = Instant::now();

        fetcher.on_notify(Announce::new(session(&peer), hash, 11, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        assert!(fetcher
            .filter_headers(peer.peer_id(), vec![block.header.clone()], now)
            .is_empty());
        assert!(fetcher.fetched.contains_key(&hash));
        assert!(!fetcher.fetching.contains_key(&hash));
        assert!(fetcher.complete_deadline.is_some());

        fetcher.on_complete_timer(now + Duration::from_secs(1));
        assert!(fetcher.completing.contains_key(&hash));
        assert!(!fetcher.fetched.contains_key(&hash));
        assert_eq!(fetcher.body_attempts[&hash], 1);

        // a body of another block is handed back
        let other = random_block(11, Some(head(&chain).hash()), Some(1));
        let returned = fetcher.filter_bodies(
            peer.peer_id(),
            vec![other.body.clone(), block.body.clone()],
            now,
        );
        assert_eq!(returned, vec![other.body]);
        assert!(is_forgotten(&fetcher, &hash));
        assert_eq!(fetcher.queued[&hash].block, block);

        // delivering again is a no-op
        let returned = fetcher.filter_bodies(peer.peer_id(), vec![block.body.clone()], now);
        assert_eq!(returned, vec![block.body.clone()]);
        assert_eq!(fetcher.queued.len(), 1);

        settle().await;
        assert!(peer.requests().contains(&PeerRequest::Bodies(vec![hash])));
    }

    #[tokio::test]
    async fn body_from_other_peer_is_not_matched() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let peer = Arc::new(TestPeer::new("peer"));
        let block = random_block(11, Some(head(&chain).hash()), Some(2));
        let now = Instant::now();

        fetcher.on_notify(Announce::new(session(&peer), block.hash(), 11, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        fetcher.filter_headers(peer.peer_id(), vec![block.header.clone()], now);
        fetcher.on_complete_timer(now + Duration::from_secs(1));

        let returned =
            fetcher.filter_bodies(&PeerId::from("other"), vec![block.body.clone()], now);
        assert_eq!(returned.len(), 1);
        assert!(fetcher.completing.contains_key(&block.hash()));
        assert!(fetcher.queued.is_empty());
    }

    #[tokio::test]
    async fn body_retries_keep_header() {
        let Harness { mut fetcher, chain, .. } = harness(FetcherBuilder::default());
        let first = Arc::new(TestPeer::new("first"));
        let second = Arc::new(TestPeer::new("second"));
        let block = random_block(11, Some(head(&chain).hash()), Some(2));
        let hash = block.hash();
        let now = Instant::now();

        fetcher.on_notify(Announce::new(session(&first), hash, 11, now));
        fetcher.on_fetch_timer(now + Duration::from_secs(1));
        fetcher.filter_headers(first.peer_id(), vec![block.header.clone()], now);
        fetcher.on_complete_timer(now + Duration::from_secs(1));
        // a late announcer becomes a fallback
        fetcher.on_notify(Announce::new(session(&second), hash, 11, now));
        fetcher.fallbacks.get_mut(&hash).unwrap().retain(|a| a.origin() == second.peer_id());

        fetcher.expire_completions(now + FETCH_TIMEOUT * 4);
        assert_eq!(fetcher.body_attempts[&hash], 2);
        let retry = &fetcher.completing[&hash];
        assert_eq!(retry.origin(), second.peer_id());
        assert_eq!(retry.header.as_ref(), Some(&block.header));
        assert_eq!(fetcher.announces.get(first.peer_id()), None);
        assert_eq!(fetcher.announces[second.peer_id()], 1);

        assert!(fetcher.filter_bodies(second.peer_id(), vec![block.body.clone()], now).is_empty());
        assert!(fetcher.queued.contains_key(&hash));
    }

    #[tokio::test]
    async fn enqueue_respects_block_limit() {
        let Harness { mut fetcher, chain, .. } =
            harness(FetcherBuilder::default().with_block_limit(2));
        let parent = head(&chain).hash();

        for _ in 0..3 {
            fetcher.on_inject(PeerId::from("peer"), random_block(11, Some(parent), Some(1)));
        }
        assert_eq!(fetcher.queued.len(), 2);
        assert_eq!(fetcher.queues[&PeerId::from("peer")], 2);

        // duplicates are not counted
        let block = fetcher.queued.values().next().unwrap().block.clone();
        fetcher.on_inject(PeerId::from("other"), block);
        assert_eq!(fetcher.queued.len(), 2);
        assert!(!fetcher.queues.contains_key(&PeerId::from("other")));
    }

    #[tokio::test]
    async fn injections_dropped_when_queue_full() {
        let Harness { mut fetcher, chain, .. } =
            harness(FetcherBuilder::default().with_max_queued_injections(1));
        let parent = head(&chain).hash();

        fetcher.on_inject(PeerId::from("a"), random_block(11, Some(parent), Some(1)));
        fetcher.on_inject(PeerId::from("b"), random_block(11, Some(parent), Some(1)));
        assert_eq!(fetcher.queued.len(), 1);
    }

    #[tokio::test]
    async fn import_queue_drains_in_order() {
        let Harness { mut fetcher, chain, mut broadcasts, .. } =
            harness(FetcherBuilder::default());
        let next = random_block(11, Some(head(&chain).hash()), Some(1));
        let ahead = random_block(13, Some(random_hash()), Some(1));
        let stale = random_block(2, Some(random_hash()), Some(1));

        let origin = PeerId::from("peer");
        fetcher.on_inject(origin.clone(), ahead.clone());
        fetcher.on_inject(origin.clone(), next.clone());
        fetcher.on_inject(origin.clone(), stale.clone());
        fetcher.import_queued();

        // too old
        assert!(!fetcher.queued.contains_key(&stale.hash()));
        // waiting for its parent
        assert!(fetcher.queued.contains_key(&ahead.hash()));
        assert_eq!(fetcher.queue.peek(), Some(&Reverse((13, ahead.hash()))));

        let hash = fetcher.done_rx.recv().await.unwrap();
        assert_eq!(hash, next.hash());
        fetcher.on_import_done(hash);
        assert!(!fetcher.queued.contains_key(&next.hash()));
        assert_eq!(chain.inserted(), vec![next.hash()]);
        assert_eq!(broadcasts.recv().await, Some((next.hash(), true)));
        assert_eq!(broadcasts.recv().await, Some((next.hash(), false)));
        assert_eq!(fetcher.queues[&origin], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_announced_block() {
        chainsync_tracing::init_test_tracing();
        let Harness { fetcher, chain, mut broadcasts, _signal, .. } =
            harness(FetcherBuilder::default());
        let (peer, mut requests) = TestPeer::with_listener("peer");
        let peer = Arc::new(peer);
        let block = random_block(11, Some(head(&chain).hash()), Some(3));
        let hash = block.hash();

        let handle = fetcher.handle();
        let _fetcher = fetcher.spawn();

        handle.notify(session(&peer), hash, 11, Instant::now()).unwrap();
        assert_eq!(requests.recv().await, Some(PeerRequest::OneHeader { hash, number: 11 }));

        // unrelated headers pass through
        let unrelated = random_block(11, Some(random_hash()), Some(1)).header;
        let returned = handle
            .filter_headers(
                peer.peer_id().clone(),
                vec![unrelated.clone(), block.header.clone()],
                Instant::now(),
            )
            .await;
        assert_eq!(returned, vec![unrelated]);

        assert_eq!(requests.recv().await, Some(PeerRequest::Bodies(vec![hash])));
        let returned = handle
            .filter_bodies(peer.peer_id().clone(), vec![block.body.clone()], Instant::now())
            .await;
        assert!(returned.is_empty());

        assert_eq!(broadcasts.recv().await, Some((hash, true)));
        assert_eq!(broadcasts.recv().await, Some((hash, false)));
        assert!(chain.has_block(hash));
    }

    #[tokio::test]
    async fn handle_fails_after_shutdown() {
        let Harness { fetcher, chain, _signal: signal, .. } = harness(FetcherBuilder::default());
        let handle = fetcher.handle();
        let task = fetcher.spawn();

        signal.fire();
        task.await.unwrap();

        let peer = session(&Arc::new(TestPeer::new("peer")));
        assert_matches!(
            handle.notify(peer, random_hash(), 11, Instant::now()),
            Err(FetcherError::Terminated)
        );
        let header = head(&chain);
        assert!(handle
            .filter_headers(PeerId::from("peer"), vec![header], Instant::now())
            .await
            .is_empty());
    }
}
