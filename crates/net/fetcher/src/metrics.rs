use metrics::{register_counter, register_histogram, Counter, Histogram};

/// Fetcher metrics, registered under the `sync.fetcher` scope.
#[derive(Clone)]
pub struct FetcherMetrics {
    /// Announcements received.
    pub(crate) announces_in: Counter,
    /// Time from receiving an announced block to announcing it after import, in seconds.
    pub(crate) announce_out_duration: Histogram,
    /// Announcements dropped for being too far from the chain head.
    pub(crate) announces_dropped: Counter,
    /// Announcements dropped because the peer exceeded its allowance.
    pub(crate) announces_dos: Counter,
    /// Propagated blocks received.
    pub(crate) broadcasts_in: Counter,
    /// Time from receiving a block to propagating it after header verification, in seconds.
    pub(crate) broadcast_out_duration: Histogram,
    /// Propagated blocks dropped because the peer exceeded its allowance.
    pub(crate) broadcasts_dos: Counter,
    /// Single header requests sent.
    pub(crate) header_fetches: Counter,
    /// Bodies requested.
    pub(crate) body_fetches: Counter,
    /// Headers handed to the header filter.
    pub(crate) header_filter_in: Counter,
    /// Headers returned by the header filter.
    pub(crate) header_filter_out: Counter,
    /// Bodies handed to the body filter.
    pub(crate) body_filter_in: Counter,
    /// Bodies returned by the body filter.
    pub(crate) body_filter_out: Counter,
}

impl Default for FetcherMetrics {
    fn default() -> Self {
        Self {
            announces_in: register_counter!("sync.fetcher.announces_in"),
            announce_out_duration: register_histogram!("sync.fetcher.announce_out_duration"),
            announces_dropped: register_counter!("sync.fetcher.announces_dropped"),
            announces_dos: register_counter!("sync.fetcher.announces_dos"),
            broadcasts_in: register_counter!("sync.fetcher.broadcasts_in"),
            broadcast_out_duration: register_histogram!("sync.fetcher.broadcast_out_duration"),
            broadcasts_dos: register_counter!("sync.fetcher.broadcasts_dos"),
            header_fetches: register_counter!("sync.fetcher.header_fetches"),
            body_fetches: register_counter!("sync.fetcher.body_fetches"),
            header_filter_in: register_counter!("sync.fetcher.header_filter_in"),
            header_filter_out: register_counter!("sync.fetcher.header_filter_out"),
            body_filter_in: register_counter!("sync.fetcher.body_filter_in"),
            body_filter_out: register_counter!("sync.fetcher.body_filter_out"),
        }
    }
}

impl std::fmt::Debug for FetcherMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherMetrics").finish_non_exhaustive()
    }
}
