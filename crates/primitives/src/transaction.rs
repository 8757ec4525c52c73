use crate::{keccak256, Bytes, TxHash};

/// An opaque transaction as carried in a block body.
///
/// Execution semantics are outside of the sync pipeline; only the identity of the transaction
/// matters here, since it feeds the per-currency transaction root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Sender scoped sequence number.
    pub nonce: u64,
    /// Raw transaction payload.
    pub input: Bytes,
}

impl Transaction {
    /// Creates a new transaction.
    pub fn new(nonce: u64, input: impl Into<Bytes>) -> Self {
        Self { nonce, input: input.into() }
    }

    /// Calculates the transaction hash.
    pub fn hash(&self) -> TxHash {
        let mut buf = Vec::with_capacity(8 + self.input.len());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.input);
        keccak256(buf)
    }

    /// Approximate in-memory size of the transaction.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.input.len()
    }
}
