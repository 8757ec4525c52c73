use crate::{keccak256, proofs::calculate_receipt_root, TxHash, H256};

/// Receipt containing the result of a transaction execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: TxHash,
    /// If the transaction was executed successfully.
    pub success: bool,
    /// Gas used by the transaction.
    pub gas_used: u64,
}

impl Receipt {
    /// Calculates the receipt hash.
    pub fn hash(&self) -> H256 {
        let mut buf = Vec::with_capacity(32 + 1 + 8);
        buf.extend_from_slice(self.tx_hash.as_slice());
        buf.push(self.success as u8);
        buf.extend_from_slice(&self.gas_used.to_be_bytes());
        keccak256(buf)
    }

    /// Approximate in-memory size of the receipt.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// The receipts of a single currency within a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrencyReceipts {
    /// Currency the receipts belong to.
    pub currency: String,
    /// Receipts in transaction order.
    pub receipts: Vec<Receipt>,
}

impl CurrencyReceipts {
    /// Creates a new receipt list for the given currency.
    pub fn new(currency: impl Into<String>, receipts: Vec<Receipt>) -> Self {
        Self { currency: currency.into(), receipts }
    }

    /// Calculates the receipt root of this list.
    pub fn root(&self) -> H256 {
        calculate_receipt_root(&self.receipts)
    }

    /// Approximate in-memory size of the receipt list.
    pub fn size(&self) -> usize {
        self.currency.len() + self.receipts.iter().map(Receipt::size).sum::<usize>()
    }
}
