#![allow(unused)]

mod chain;
mod peer;

/// Generators for different data structures like block headers, block bodies and ranges of those.
pub mod generators;

pub use chain::{TestBroadcaster, TestChain, TestDownloadClient};
pub use peer::{PeerRequest, TestPeer};
