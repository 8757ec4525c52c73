use crate::{fetcher::Fetcher, metrics::FetcherMetrics};
use chainsync_interfaces::{
    chain::Chain,
    p2p::{broadcast::BlockBroadcaster, downloader::DownloadClient},
};
use chainsync_tasks::{shutdown::Shutdown, TaskSpawner};
use std::time::Duration;

/// Time allowance before an announced block is explicitly requested.
pub const ARRIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval used to collate almost-expired announces with fetches.
pub const GATHER_SLACK: Duration = Duration::from_millis(100);

/// Maximum allotted time to return an explicitly requested header.
///
/// Bodies get three times as long.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(9);

/// Maximum allowed backward distance from the chain head.
pub const MAX_UNCLE_DIST: u64 = 7;

/// Maximum allowed distance from the chain head to queue.
pub const MAX_QUEUE_DIST: u64 = 32;

/// Maximum number of unique blocks a peer may have announced.
pub const HASH_LIMIT: usize = 256;

/// Maximum number of unique blocks a peer may have delivered.
pub const BLOCK_LIMIT: usize = 64;

/// Maximum number of peers recorded as announcers of a single hash.
pub const MAX_ANNOUNCERS_PER_HASH: usize = 16;

/// Maximum number of fallback announcers kept for retries.
pub const MAX_FALLBACK_ANNOUNCERS: usize = 6;

/// Number of header or body requests sent for a hash before it is abandoned.
pub const MAX_FETCH_ATTEMPTS: usize = 3;

/// Propagated blocks are dropped while this many blocks wait for import.
pub const MAX_QUEUED_INJECTIONS: usize = 64;

/// Builder for the [`Fetcher`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetcherBuilder {
    /// Time allowance before an announced block is requested.
    pub arrive_timeout: Duration,
    /// Slack subtracted from the arrive timeout to batch announces into one fetch round.
    pub gather_slack: Duration,
    /// Timeout of a header request.
    pub fetch_timeout: Duration,
    /// Maximum backward distance from the chain head.
    pub max_uncle_dist: u64,
    /// Maximum forward distance from the chain head.
    pub max_queue_dist: u64,
    /// Per peer announcement allowance.
    pub hash_limit: usize,
    /// Per peer delivered block allowance.
    pub block_limit: usize,
    /// Announcers recorded per hash.
    pub max_announcers_per_hash: usize,
    /// Fallback announcers kept per hash.
    pub max_fallback_announcers: usize,
    /// Requests per hash and part before giving up.
    pub max_fetch_attempts: usize,
    /// Import queue size above which propagated blocks are dropped.
    pub max_queued_injections: usize,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self {
            arrive_timeout: ARRIVE_TIMEOUT,
            gather_slack: GATHER_SLACK,
            fetch_timeout: FETCH_TIMEOUT,
            max_uncle_dist: MAX_UNCLE_DIST,
            max_queue_dist: MAX_QUEUE_DIST,
            hash_limit: HASH_LIMIT,
            block_limit: BLOCK_LIMIT,
            max_announcers_per_hash: MAX_ANNOUNCERS_PER_HASH,
            max_fallback_announcers: MAX_FALLBACK_ANNOUNCERS,
            max_fetch_attempts: MAX_FETCH_ATTEMPTS,
            max_queued_injections: MAX_QUEUED_INJECTIONS,
        }
    }
}

impl FetcherBuilder {
    /// Set the time allowance before an announced block is requested.
    pub fn with_arrive_timeout(mut self, arrive_timeout: Duration) -> Self {
        self.arrive_timeout = arrive_timeout;
        self
    }

    /// Set the slack used to batch announces into one fetch round.
    pub fn with_gather_slack(mut self, gather_slack: Duration) -> Self {
        self.gather_slack = gather_slack;
        self
    }

    /// Set the header request timeout.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Set the backward and forward distances from the chain head a block may have.
    pub fn with_distances(mut self, max_uncle_dist: u64, max_queue_dist: u64) -> Self {
        self.max_uncle_dist = max_uncle_dist;
        self.max_queue_dist = max_queue_dist;
        self
    }

    /// Set the per peer announcement allowance.
    pub fn with_hash_limit(mut self, hash_limit: usize) -> Self {
        self.hash_limit = hash_limit;
        self
    }

    /// Set the per peer delivered block allowance.
    pub fn with_block_limit(mut self, block_limit: usize) -> Self {
        self.block_limit = block_limit;
        self
    }

    /// Set the number of announcers recorded per hash.
    pub fn with_max_announcers_per_hash(mut self, max_announcers_per_hash: usize) -> Self {
        self.max_announcers_per_hash = max_announcers_per_hash;
        self
    }

    /// Set the number of fallback announcers kept per hash.
    pub fn with_max_fallback_announcers(mut self, max_fallback_announcers: usize) -> Self {
        self.max_fallback_announcers = max_fallback_announcers;
        self
    }

    /// Set the number of requests per hash and part before giving up.
    pub fn with_max_fetch_attempts(mut self, max_fetch_attempts: usize) -> Self {
        self.max_fetch_attempts = max_fetch_attempts.max(1);
        self
    }

    /// Set the import queue size above which propagated blocks are dropped.
    pub fn with_max_queued_injections(mut self, max_queued_injections: usize) -> Self {
        self.max_queued_injections = max_queued_injections;
        self
    }

    /// Builds the fetcher.
    ///
    /// Requests and imports run on tasks spawned through `spawner`. The fetcher stops once
    /// `shutdown` resolves.
    pub fn build<C, B, D>(
        self,
        chain: C,
        broadcaster: B,
        client: D,
        spawner: Box<dyn TaskSpawner>,
        shutdown: Shutdown,
    ) -> Fetcher<C, B, D>
    where
        C: Chain + 'static,
        B: BlockBroadcaster + 'static,
        D: DownloadClient + 'static,
    {
        Fetcher::new(self, chain, broadcaster, client, spawner, shutdown, FetcherMetrics::default())
    }
}
