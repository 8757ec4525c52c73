use crate::{
    constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH},
    keccak256, Header, Receipt, Transaction, H256,
};

/// Calculates the root of an ordered list of item hashes.
///
/// This is a flat keccak commitment over `(index, hash)` pairs, not a Merkle Patricia trie root:
/// it only has to detect mismatches between a header and a delivered body, it is never compared
/// against roots computed elsewhere. An empty list always yields [`EMPTY_ROOT_HASH`].
pub fn ordered_root(leaves: impl IntoIterator<Item = H256>) -> H256 {
    let mut buf = Vec::new();
    for (index, leaf) in leaves.into_iter().enumerate() {
        buf.extend_from_slice(&(index as u64).to_be_bytes());
        buf.extend_from_slice(leaf.as_slice());
    }
    if buf.is_empty() {
        return EMPTY_ROOT_HASH
    }
    keccak256(buf)
}

/// Calculate a transaction root.
pub fn calculate_transaction_root<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> H256 {
    ordered_root(transactions.into_iter().map(Transaction::hash))
}

/// Calculates the receipt root for a list of receipts.
pub fn calculate_receipt_root<'a>(receipts: impl IntoIterator<Item = &'a Receipt>) -> H256 {
    ordered_root(receipts.into_iter().map(Receipt::hash))
}

/// Calculates the uncle hash for a set of uncle headers.
pub fn calculate_uncle_hash(uncles: &[Header]) -> H256 {
    if uncles.is_empty() {
        return EMPTY_OMMER_ROOT_HASH
    }
    let mut buf = Vec::with_capacity(uncles.len() * 32);
    for uncle in uncles {
        buf.extend_from_slice(uncle.hash_slow().as_slice());
    }
    keccak256(buf)
}
