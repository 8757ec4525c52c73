#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Commonly used types for chain synchronisation.
//!
//! This crate contains the header, body and receipt types exchanged with peers, plus the helpers
//! used to derive and check their commitment roots.

mod block;
pub mod constants;
mod header;
mod peer;
mod receipt;
mod transaction;

/// Helper functions for calculating commitment roots.
pub mod proofs;

pub use block::{BlockBody, BlockHashOrNumber, CurrencyBlock, SealedBlock};
pub use constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH};
pub use header::{CurrencyRoots, Header, SealedHeader};
pub use peer::{PeerId, WithPeerId};
pub use receipt::{CurrencyReceipts, Receipt};
pub use transaction::Transaction;

/// A block hash.
pub type BlockHash = H256;
/// A block number.
pub type BlockNumber = u64;
/// A transaction hash.
pub type TxHash = H256;

pub use alloy_primitives::{keccak256, Bytes, B256 as H256};
