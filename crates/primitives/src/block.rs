use crate::{
    constants::EMPTY_ROOT_HASH,
    proofs::{calculate_transaction_root, calculate_uncle_hash},
    BlockHash, BlockNumber, CurrencyReceipts, Header, SealedHeader, Transaction, H256,
};
use std::{fmt, ops::Deref};

/// Either a block hash _or_ a block number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockHashOrNumber {
    /// A block hash
    Hash(H256),
    /// A block number
    Number(u64),
}

impl From<H256> for BlockHashOrNumber {
    fn from(value: H256) -> Self {
        BlockHashOrNumber::Hash(value)
    }
}

impl From<u64> for BlockHashOrNumber {
    fn from(value: u64) -> Self {
        BlockHashOrNumber::Number(value)
    }
}

impl fmt::Display for BlockHashOrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockHashOrNumber::Hash(hash) => write!(f, "{hash}"),
            BlockHashOrNumber::Number(num) => write!(f, "{num}"),
        }
    }
}

/// The transactions of a single currency within a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrencyBlock {
    /// Currency the transactions belong to.
    pub currency: String,
    /// Transactions in block order.
    pub transactions: Vec<Transaction>,
}

impl CurrencyBlock {
    /// Creates a new transaction list for the given currency.
    pub fn new(currency: impl Into<String>, transactions: Vec<Transaction>) -> Self {
        Self { currency: currency.into(), transactions }
    }

    /// Calculates the transaction root of this list.
    pub fn root(&self) -> H256 {
        calculate_transaction_root(&self.transactions)
    }

    /// Approximate in-memory size of the list.
    pub fn size(&self) -> usize {
        self.currency.len() + self.transactions.iter().map(Transaction::size).sum::<usize>()
    }
}

/// A response to `GetBlockBodies`, containing bodies if any bodies were found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockBody {
    /// Per-currency transactions in the block
    pub transactions: Vec<CurrencyBlock>,
    /// Uncle headers for the given block
    pub uncles: Vec<Header>,
}

impl BlockBody {
    /// Returns the transaction root of the given currency, the empty root if the body carries no
    /// transactions for it.
    pub fn transaction_root(&self, currency: &str) -> H256 {
        self.transactions
            .iter()
            .find(|block| block.currency == currency)
            .map(CurrencyBlock::root)
            .unwrap_or(EMPTY_ROOT_HASH)
    }

    /// Checks the body against the commitments of the header.
    ///
    /// Every per-currency transaction root and the uncle hash must match, and the body must not
    /// carry transactions of a currency the header does not commit to.
    pub fn matches_header(&self, header: &Header) -> bool {
        if calculate_uncle_hash(&self.uncles) != header.uncle_hash {
            return false
        }
        let uncommitted = self.transactions.iter().any(|block| {
            !block.transactions.is_empty() && header.currency_roots(&block.currency).is_none()
        });
        if uncommitted {
            return false
        }
        header.roots.iter().all(|roots| self.transaction_root(&roots.currency) == roots.tx_root)
    }

    /// Approximate in-memory size of the body.
    pub fn size(&self) -> usize {
        self.transactions.iter().map(CurrencyBlock::size).sum::<usize>() +
            self.uncles.iter().map(Header::size).sum::<usize>()
    }
}

impl Header {
    /// Checks a list of per-currency receipts against the receipt roots of the header.
    pub fn matches_receipts(&self, receipts: &[CurrencyReceipts]) -> bool {
        let uncommitted = receipts.iter().any(|list| {
            !list.receipts.is_empty() && self.currency_roots(&list.currency).is_none()
        });
        if uncommitted {
            return false
        }
        self.roots.iter().all(|roots| {
            let root = receipts
                .iter()
                .find(|list| list.currency == roots.currency)
                .map(CurrencyReceipts::root)
                .unwrap_or(EMPTY_ROOT_HASH);
            root == roots.receipt_root
        })
    }
}

/// Sealed full block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SealedBlock {
    /// Locked block header.
    pub header: SealedHeader,
    /// Block body.
    pub body: BlockBody,
}

impl SealedBlock {
    /// Create a new sealed block instance using the sealed header and the block body.
    pub fn new(header: SealedHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    /// Creates a block that only consists of the header, with an empty body.
    pub fn with_header(header: SealedHeader) -> Self {
        Self { header, body: BlockBody::default() }
    }

    /// Header hash.
    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }

    /// Block number.
    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Splits the sealed block into underlying components
    pub fn split(self) -> (SealedHeader, BlockBody) {
        (self.header, self.body)
    }

    /// Approximate in-memory size of the block.
    pub fn size(&self) -> usize {
        self.header.size() + self.body.size()
    }
}

impl Deref for SealedBlock {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}
