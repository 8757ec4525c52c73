#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Interface bindings between the sync engines and the rest of the node.
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export mock peers, chains and block generators for testing

/// Chain access traits.
pub mod chain;

/// Consensus errors.
pub mod consensus;

/// P2P traits.
pub mod p2p;

/// Syncing related traits.
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
/// Common test helpers for mocking out peers, the chain and broadcasting.
pub mod test_utils;
