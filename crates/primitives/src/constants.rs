//! Commitment constants.

use crate::H256;
use alloy_primitives::b256;

/// Root of an empty ordered list (transactions or receipts).
pub const EMPTY_ROOT_HASH: H256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Hash of an empty uncle list.
pub const EMPTY_OMMER_ROOT_HASH: H256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");
