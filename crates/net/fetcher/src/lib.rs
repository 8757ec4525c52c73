#![warn(missing_docs, unreachable_pub, unused_crate_dependencies)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Announcement based block retrieval.
//!
//! Peers announce new blocks by hash or propagate them whole. The [`Fetcher`] collects those
//! announcements, requests the header and body of every block that is close to the local chain
//! head from one of its announcers, retries against the others on timeout and imports the
//! completed blocks in ascending order.
//!
//! The networking layer talks to the running fetcher through a [`FetcherHandle`]: it forwards
//! announcements and propagated blocks, and passes incoming headers and bodies through the
//! filters so the fetcher can pick out the responses to its own requests.

mod announce;
mod builder;
mod error;
mod fetcher;
mod handle;
mod import;
mod metrics;

pub use builder::{
    FetcherBuilder, ARRIVE_TIMEOUT, BLOCK_LIMIT, FETCH_TIMEOUT, GATHER_SLACK, HASH_LIMIT,
    MAX_ANNOUNCERS_PER_HASH, MAX_FALLBACK_ANNOUNCERS, MAX_FETCH_ATTEMPTS, MAX_QUEUED_INJECTIONS,
    MAX_QUEUE_DIST, MAX_UNCLE_DIST,
};
pub use error::{FetcherError, FetcherResult};
pub use fetcher::Fetcher;
pub use handle::FetcherHandle;
pub use self::metrics::FetcherMetrics;
