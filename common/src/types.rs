use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};

// A log emitted by a source contract, as returned by the ledger endpoint.
// Topics carry the event signature hash and the indexed arguments,
// data carries the ABI-encoded non-indexed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
}

impl RawEvent {
    // Events are scanned and replayed in (block, log index) order
    pub fn ordering_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// Outcome of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    // false means the transaction reverted on-chain
    pub status: bool,
}
