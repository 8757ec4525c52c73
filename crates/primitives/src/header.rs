use crate::{
    constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH},
    keccak256, BlockHash, BlockNumber, Bytes, H256,
};
use std::ops::Deref;

/// Transaction and receipt commitments of a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyRoots {
    /// Name of the currency.
    pub currency: String,
    /// Root of the currency's transactions in the block.
    pub tx_root: H256,
    /// Root of the currency's receipts in the block.
    pub receipt_root: H256,
}

impl CurrencyRoots {
    /// Roots of a currency without any transactions.
    pub fn empty(currency: impl Into<String>) -> Self {
        Self { currency: currency.into(), tx_root: EMPTY_ROOT_HASH, receipt_root: EMPTY_ROOT_HASH }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.currency.len() as u64).to_be_bytes());
        out.extend_from_slice(self.currency.as_bytes());
        out.extend_from_slice(self.tx_root.as_slice());
        out.extend_from_slice(self.receipt_root.as_slice());
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    /// The hash of the parent block's header.
    pub parent_hash: H256,
    /// The number of ancestor blocks.
    pub number: BlockNumber,
    /// Per-currency transaction and receipt roots.
    pub roots: Vec<CurrencyRoots>,
    /// The hash of the uncle list of this block.
    pub uncle_hash: H256,
    /// Unix timestamp of the block's inception.
    pub timestamp: u64,
    /// Arbitrary extra data.
    pub extra_data: Bytes,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            parent_hash: Default::default(),
            number: 0,
            roots: Vec::new(),
            uncle_hash: EMPTY_OMMER_ROOT_HASH,
            timestamp: 0,
            extra_data: Default::default(),
        }
    }
}

impl Header {
    /// Returns the roots recorded for the given currency.
    pub fn currency_roots(&self, currency: &str) -> Option<&CurrencyRoots> {
        self.roots.iter().find(|roots| roots.currency == currency)
    }

    /// Returns true if the block carries neither transactions nor uncles.
    ///
    /// Such a block is complete without a body round trip.
    pub fn is_empty_body(&self) -> bool {
        self.uncle_hash == EMPTY_OMMER_ROOT_HASH &&
            self.roots.iter().all(|roots| roots.tx_root == EMPTY_ROOT_HASH)
    }

    /// Returns true if every currency of the block has an empty receipt list.
    pub fn is_empty_receipts(&self) -> bool {
        self.roots.iter().all(|roots| roots.receipt_root == EMPTY_ROOT_HASH)
    }

    /// Heavy function that will calculate hash of data and will *not* save the change to
    /// metadata. Use [`Header::seal_slow`] to cache the hash.
    pub fn hash_slow(&self) -> H256 {
        let mut out = Vec::with_capacity(self.size());
        self.encode(&mut out);
        keccak256(out)
    }

    /// Calculate hash and seal the Header so that it can't be changed.
    pub fn seal_slow(self) -> SealedHeader {
        let hash = self.hash_slow();
        self.seal(hash)
    }

    /// Seal the header with a known hash.
    ///
    /// WARNING: This method does not perform validation whether the hash is correct.
    pub fn seal(self, hash: H256) -> SealedHeader {
        SealedHeader { header: self, hash }
    }

    /// Approximate in-memory size of the header.
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() +
            self.roots
                .iter()
                .map(|roots| std::mem::size_of::<CurrencyRoots>() + roots.currency.len())
                .sum::<usize>() +
            self.extra_data.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.parent_hash.as_slice());
        out.extend_from_slice(&self.number.to_be_bytes());
        out.extend_from_slice(&(self.roots.len() as u64).to_be_bytes());
        for roots in &self.roots {
            roots.encode(out);
        }
        out.extend_from_slice(self.uncle_hash.as_slice());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&(self.extra_data.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.extra_data);
    }
}

/// A [`Header`] that is sealed at a precalculated hash, use [`SealedHeader::unseal()`] if you want
/// to modify header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SealedHeader {
    /// Locked Header fields.
    header: Header,
    /// Locked Header hash.
    hash: BlockHash,
}

impl SealedHeader {
    /// Extract raw header that can be modified.
    pub fn unseal(self) -> Header {
        self.header
    }

    /// Return header/block hash.
    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Return the inner header.
    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl Default for SealedHeader {
    fn default() -> Self {
        Header::default().seal_slow()
    }
}

impl AsRef<Header> for SealedHeader {
    fn as_ref(&self) -> &Header {
        &self.header
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}
