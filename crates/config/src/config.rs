//! Configuration files.
use chainsync_downloaders::queue::{
    DownloadQueueBuilder, BLOCK_CACHE_ITEMS, BLOCK_CACHE_MEMORY, BLOCK_CACHE_SIZE_WEIGHT,
    MAX_HEADER_FETCH, MAX_RESULTS_PROCESS,
};
use chainsync_fetcher::{
    FetcherBuilder, ARRIVE_TIMEOUT, BLOCK_LIMIT, FETCH_TIMEOUT, GATHER_SLACK, HASH_LIMIT,
    MAX_ANNOUNCERS_PER_HASH, MAX_FALLBACK_ANNOUNCERS, MAX_FETCH_ATTEMPTS, MAX_QUEUED_INJECTIONS,
    MAX_QUEUE_DIST, MAX_UNCLE_DIST,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Configuration of the chain sync engines.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Download queue configuration.
    pub queue: QueueConfig,
    /// Block fetcher configuration.
    pub fetcher: FetcherConfig,
}

impl Config {
    /// Loads the configuration from the TOML file at `path`, creating it with the defaults if it
    /// does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, confy::ConfyError> {
        confy::load_path(path)
    }

    /// Stores the configuration as TOML at `path`.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<(), confy::ConfyError> {
        confy::store_path(path, self)
    }
}

/// Download queue configuration.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of blocks held in the result window.
    pub block_cache_items: usize,
    /// Approximate memory budget of the result window, in bytes.
    pub block_cache_memory: usize,
    /// Weight of the latest block in the block size average.
    pub block_cache_size_weight: f64,
    /// Number of headers requested to fill one skeleton gap.
    pub max_header_fetch: usize,
    /// Maximum number of blocks handed out at once.
    pub max_results_process: usize,
}

impl Default for QueueConfig {
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

impl From<QueueConfig> for DownloadQueueBuilder {
    fn from(config: QueueConfig) -> Self {
        DownloadQueueBuilder::default()
            .with_block_cache_items(config.block_cache_items)
            .with_block_cache_memory(config.block_cache_memory)
            .with_block_cache_size_weight(config.block_cache_size_weight)
            .with_max_header_fetch(config.max_header_fetch)
            .with_max_results_process(config.max_results_process)
    }
}

/// Block fetcher configuration.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Time allowance before an announced block is requested.
    #[serde(with = "humantime_serde")]
    pub arrive_timeout: Duration,
    /// Slack used to batch almost expired announces into one fetch round.
    #[serde(with = "humantime_serde")]
    pub gather_slack: Duration,
    /// Header request timeout. Body requests get three times as long.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Maximum backward distance of an announced block from the chain head.
    pub max_uncle_dist: u64,
    /// Maximum forward distance of an announced block from the chain head.
    pub max_queue_dist: u64,
    /// Maximum number of outstanding announcements per peer.
    pub hash_limit: usize,
    /// Maximum number of queued blocks per peer.
    pub block_limit: usize,
    /// Maximum number of announcers recorded per hash.
    pub max_announcers_per_hash: usize,
    /// Maximum number of announcers kept to retry a timed out request against.
    pub max_fallback_announcers: usize,
    /// Requests per hash and block part before the hash is abandoned.
    pub max_fetch_attempts: usize,
    /// Import queue size above which propagated blocks are dropped.
    pub max_queued_injections: usize,
}

impl Default for FetcherConfig {
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

impl From<FetcherConfig> for FetcherBuilder {
    fn from(config: FetcherConfig) -> Self {
        FetcherBuilder::default()
            .with_arrive_timeout(config.arrive_timeout)
            .with_gather_slack(config.gather_slack)
            .with_fetch_timeout(config.fetch_timeout)
            .with_distances(config.max_uncle_dist, config.max_queue_dist)
            .with_hash_limit(config.hash_limit)
            .with_block_limit(config.block_limit)
            .with_max_announcers_per_hash(config.max_announcers_per_hash)
            .with_max_fallback_announcers(config.max_fallback_announcers)
            .with_max_fetch_attempts(config.max_fetch_attempts)
            .with_max_queued_injections(config.max_queued_injections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENSION: &str = "toml";

    fn with_tempdir(filename: &str, proc: fn(&std::path::Path)) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join(filename).with_extension(EXTENSION);

        proc(&config_path);

        temp_dir.close().unwrap()
    }

    #[test]
    fn test_store_config() {
        with_tempdir("config-store-test", |config_path| {
            let config = Config::default();
            config.store(config_path).unwrap();
        })
    }

    #[test]
    fn test_load_config() {
        with_tempdir("config-load-test", |config_path| {
            let config = Config::default();
            config.store(config_path).unwrap();

            let loaded_config = Config::load(config_path).unwrap();
            assert_eq!(config, loaded_config);
        })
    }

    #[test]
    fn test_load_missing_config_creates_defaults() {
        with_tempdir("config-missing-test", |config_path| {
            let loaded_config = Config::load(config_path).unwrap();
            assert_eq!(loaded_config, Config::default());
            assert!(config_path.exists());
        })
    }

    #[test]
    fn parses_partial_config() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            max_header_fetch = 64

            [fetcher]
            fetch_timeout = "5s"
            arrive_timeout = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_header_fetch, 64);
        assert_eq!(config.queue.block_cache_items, BLOCK_CACHE_ITEMS);
        assert_eq!(config.fetcher.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.fetcher.arrive_timeout, Duration::from_millis(250));
        assert_eq!(config.fetcher.hash_limit, HASH_LIMIT);
    }

    #[test]
    fn converts_into_builders() {
        let config = FetcherConfig { max_fetch_attempts: 5, ..Default::default() };
        let builder = FetcherBuilder::from(config);
        assert_eq!(builder.max_fetch_attempts, 5);
        assert_eq!(builder.arrive_timeout, ARRIVE_TIMEOUT);

        let queue = QueueConfig { max_header_fetch: 16, ..Default::default() };
        let builder = DownloadQueueBuilder::from(queue);
        assert_eq!(builder.max_header_fetch, 16);
        assert_eq!(builder.block_cache_items, BLOCK_CACHE_ITEMS);
    }
}
