use chainsync_primitives::{
    proofs::calculate_uncle_hash, BlockBody, CurrencyBlock, CurrencyReceipts, CurrencyRoots, Header,
    Receipt, SealedBlock, SealedHeader, Transaction, EMPTY_ROOT_HASH, H256,
};
use rand::{thread_rng, Rng};
use std::ops::Range;

/// The currency used by the generators.
pub const TEST_CURRENCY: &str = "MAN";

/// Generates a random hash.
pub fn random_hash() -> H256 {
    H256::from(thread_rng().gen::<[u8; 32]>())
}

/// Generates a range of random [SealedHeader]s with empty bodies.
///
/// The parent hash of the first header
/// in the result will be equal to `head`.
///
/// The headers are assumed to not be correct if validated.
pub fn random_header_range(rng: Range<u64>, head: H256) -> Vec<SealedHeader> {
    let mut headers = Vec::with_capacity(rng.end.saturating_sub(rng.start) as usize);
    for idx in rng {
        headers.push(random_header(
            idx,
            Some(headers.last().map(|h: &SealedHeader| h.hash()).unwrap_or(head)),
        ));
    }
    headers
}

/// Generate a random [SealedHeader] with an empty body.
///
/// The header is assumed to not be correct if validated.
pub fn random_header(number: u64, parent: Option<H256>) -> SealedHeader {
    let header = Header {
        number,
        parent_hash: parent.unwrap_or_default(),
        roots: vec![CurrencyRoots::empty(TEST_CURRENCY)],
        timestamp: thread_rng().gen(),
        ..Default::default()
    };
    header.seal_slow()
}

/// Generates a random transaction.
pub fn random_tx() -> Transaction {
    let mut rng = thread_rng();
    let input: Vec<u8> = (0..rng.gen_range(1..64)).map(|_| rng.gen()).collect();
    Transaction::new(rng.gen(), input)
}

/// Generates a random block together with matching receipts.
///
/// The block has `tx_count` transactions (random if `None`) and no uncles; the header commits to
/// both the transactions and the receipts.
pub fn random_block_with_receipts(
    number: u64,
    parent: Option<H256>,
    tx_count: Option<u8>,
) -> (SealedBlock, Vec<CurrencyReceipts>) {
    let mut rng = thread_rng();
    let tx_count = tx_count.unwrap_or_else(|| rng.gen());
    let transactions: Vec<Transaction> = (0..tx_count).map(|_| random_tx()).collect();
    let receipts: Vec<Receipt> = transactions
        .iter()
        .map(|tx| Receipt { tx_hash: tx.hash(), success: true, gas_used: rng.gen_range(0..1_000_000) })
        .collect();

    let currency_block = CurrencyBlock::new(TEST_CURRENCY, transactions);
    let currency_receipts = CurrencyReceipts::new(TEST_CURRENCY, receipts);
    let body = BlockBody { transactions: vec![currency_block], uncles: vec![] };
    let header = Header {
        number,
        parent_hash: parent.unwrap_or_default(),
        roots: vec![CurrencyRoots {
            currency: TEST_CURRENCY.to_string(),
            tx_root: body.transaction_root(TEST_CURRENCY),
            receipt_root: currency_receipts.root(),
        }],
        uncle_hash: calculate_uncle_hash(&body.uncles),
        timestamp: rng.gen(),
        ..Default::default()
    };

    (SealedBlock::new(header.seal_slow(), body), vec![currency_receipts])
}

/// Generate a random block filled with signed transactions (generated using
/// [random_tx]).
///
/// If `tx_count` is `Some(0)` the block is empty and its header reports empty roots.
pub fn random_block(number: u64, parent: Option<H256>, tx_count: Option<u8>) -> SealedBlock {
    random_block_with_receipts(number, parent, tx_count).0
}

/// Generate a range of random blocks.
///
/// The parent hash of the first block
/// in the result will be equal to `head`.
///
/// See [random_block] for considerations when validating the generated blocks.
pub fn random_block_range(rng: Range<u64>, head: H256, tx_count: Range<u8>) -> Vec<SealedBlock> {
    let mut blocks =
        Vec::with_capacity(rng.end.saturating_sub(rng.start).try_into().unwrap_or(usize::MAX));
    for idx in rng {
        let tx_count = tx_count.clone().max().map(|_| thread_rng().gen_range(tx_count.clone()));
        blocks.push(random_block(
            idx,
            Some(blocks.last().map(|block: &SealedBlock| block.hash()).unwrap_or(head)),
            Some(tx_count.unwrap_or(0)),
        ));
    }
    blocks
}

/// Returns a header with the given number and parent whose body is provably empty.
pub fn empty_header(number: u64, parent: H256) -> SealedHeader {
    let header = Header {
        number,
        parent_hash: parent,
        roots: vec![CurrencyRoots {
            currency: TEST_CURRENCY.to_string(),
            tx_root: EMPTY_ROOT_HASH,
            receipt_root: EMPTY_ROOT_HASH,
        }],
        ..Default::default()
    };
    header.seal_slow()
}
