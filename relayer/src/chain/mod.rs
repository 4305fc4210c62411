mod eth;

pub use eth::EthLedger;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bridge_common::{
    abi::decode_revert_string,
    crypto::selector,
    rpc::RpcError,
    types::{RawEvent, TxReceipt},
    H160, H256,
};
use log::{info, warn};
use thiserror::Error;
use tokio::{sync::mpsc, time::sleep};

// One source event stream on a ledger: a contract address and the
// topic0 of the event signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub address: H160,
    pub topic0: H256,
}

// Why a destination contract refused the call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    // the replay map already holds this nonce; benign, treated as done
    NonceAlreadyProcessed,
    // protocol violation upstream; marked locally so it is never retried
    ZeroAmount,
    // the relayer key lacks its role; operator intervention required
    AccessControl,
    Other(String),
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::NonceAlreadyProcessed => write!(f, "nonce already processed"),
            RevertReason::ZeroAmount => write!(f, "zero amount"),
            RevertReason::AccessControl => write!(f, "access control"),
            RevertReason::Other(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    // connection refused, timeout, 5xx, nonce race: worth retrying
    #[error("transient ledger failure: {0}")]
    Transient(String),
    #[error("destination reverted: {0}")]
    Revert(RevertReason),
}

impl SubmitError {
    pub fn transient<E: fmt::Display>(error: E) -> Self {
        SubmitError::Transient(error.to_string())
    }
}

// Map a node error to a revert reason, when it is one. Custom errors are
// matched on their selector, recomputed from the canonical signatures;
// string reverts fall back to the AccessControl revert text older
// role-gated contracts emit.
pub fn classify_revert(error: &RpcError) -> Option<RevertReason> {
    if let Some(data) = error.revert_data() {
        if data.len() >= 4 {
            let head: [u8; 4] = data[..4].try_into().expect("4-byte slice");
            if head == selector("NonceAlreadyProcessed(uint256)") {
                return Some(RevertReason::NonceAlreadyProcessed);
            }
            if head == selector("ZeroAmount()") {
                return Some(RevertReason::ZeroAmount);
            }
            if head == selector("AccessControlUnauthorizedAccount(address,bytes32)") {
                return Some(RevertReason::AccessControl);
            }
            if let Some(message) = decode_revert_string(&data) {
                if message.contains("AccessControl") || message.contains("missing role") {
                    return Some(RevertReason::AccessControl);
                }
                return Some(RevertReason::Other(message));
            }
            return Some(RevertReason::Other(format!(
                "custom error 0x{}",
                hex::encode(head)
            )));
        }
    }
    // no payload: some nodes only say "execution reverted" in the message
    let message = error.node_message()?;
    if message.contains("revert") {
        return Some(RevertReason::Other(message.to_string()));
    }
    None
}

// A ledger endpoint as the relayer sees it: head queries, historical
// event scans, a live event feed and the signed submit path.
#[async_trait]
pub trait Ledger: Send + Sync {
    fn name(&self) -> &str;

    // Latest block number, freshly polled
    async fn head_block(&self) -> Result<u64, RpcError>;

    // Inclusive range scan, ascending (block, log index)
    async fn query_events(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>, RpcError>;

    // Live feed of new events. Delivery is best-effort with respect to the
    // head and duplicates may be delivered; consumers deduplicate.
    async fn subscribe(&self, filter: &EventFilter) -> mpsc::Receiver<RawEvent>;

    // Sign, submit and wait until mined
    async fn submit_tx(&self, to: H160, calldata: Vec<u8>) -> Result<TxReceipt, SubmitError>;

    // Poll the endpoint until a head query succeeds or retries run out
    async fn wait_ready(&self, max_retries: u32, interval: Duration) -> Result<(), RpcError> {
        let mut last_error = None;
        for attempt in 1..=max_retries {
            match self.head_block().await {
                Ok(head) => {
                    info!("{} endpoint ready at block {}", self.name(), head);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{} endpoint not ready (attempt {}/{}): {}",
                        self.name(),
                        attempt,
                        max_retries,
                        e
                    );
                    last_error = Some(e);
                }
            }
            sleep(interval).await;
        }
        Err(last_error
            .unwrap_or_else(|| RpcError::InvalidResponse("readiness probe never ran".into())))
    }
}
