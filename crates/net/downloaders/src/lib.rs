#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, unreachable_pub, unused_crate_dependencies)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Implements the bulk sync download algorithms.
//!
//! The [`queue::DownloadQueue`] schedules header skeleton fills, block bodies and receipts,
//! tracks the requests in flight per peer and assembles complete blocks in a bounded result
//! window. The [`sync`] module hands the queued work out to peers and tracks the sync status.

/// The block download queue.
pub mod queue;

/// Driving the download queue against the connected peers.
pub mod sync;
