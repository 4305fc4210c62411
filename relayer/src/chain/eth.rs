use std::sync::Arc;

use async_trait::async_trait;
use bridge_common::{
    crypto::RelayerKey,
    rpc::{RpcClient, RpcError},
    transaction::LegacyTransaction,
    types::{RawEvent, TxReceipt},
    H160, U256,
};
use log::{debug, trace, warn};
use tokio::{
    sync::{mpsc, Mutex, OnceCell},
    time::sleep,
};

use crate::config::{
    RECEIPT_POLL_INTERVAL, SUBMIT_GAS_LIMIT, SUBSCRIBE_POLL_INTERVAL,
};

use super::{classify_revert, EventFilter, Ledger, SubmitError};

// Channel depth of a live subscription; the consumer processes one event
// at a time, so the scanner blocks here instead of buffering unbounded
const SUBSCRIPTION_CAPACITY: usize = 64;

// EVM-style ledger endpoint speaking JSON-RPC over HTTP
pub struct EthLedger {
    name: String,
    rpc: Arc<RpcClient>,
    key: Arc<RelayerKey>,
    // live subscriptions open their first scan window this many blocks
    // behind the head, so events a recovery pass deferred are re-delivered
    // once they settle
    scan_lookback: u64,
    // fetched once, on the first submission
    chain_id: OnceCell<u64>,
    // account nonces must be strictly increasing per chain, so the
    // fetch-nonce/sign/send section admits one submission at a time
    submit_lock: Mutex<()>,
}

impl EthLedger {
    pub fn new<S: Into<String>>(
        name: S,
        url: &str,
        key: Arc<RelayerKey>,
        scan_lookback: u64,
    ) -> Self {
        Self {
            name: name.into(),
            rpc: Arc::new(RpcClient::new(url)),
            key,
            scan_lookback,
            chain_id: OnceCell::new(),
            submit_lock: Mutex::new(()),
        }
    }

    async fn cached_chain_id(&self) -> Result<u64, RpcError> {
        self.chain_id
            .get_or_try_init(|| self.rpc.chain_id())
            .await
            .copied()
    }

    // Scan loop backing a live subscription. Exits when the receiver side
    // hangs up; endpoint hiccups are retried on the next tick.
    async fn scan_new_events(
        rpc: Arc<RpcClient>,
        name: String,
        filter: EventFilter,
        scan_lookback: u64,
        sender: mpsc::Sender<RawEvent>,
    ) {
        let mut last_scanned: Option<u64> = None;
        loop {
            let head = match rpc.block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("{} live scan: head query failed: {}", name, e);
                    sleep(SUBSCRIBE_POLL_INTERVAL).await;
                    continue;
                }
            };
            let from = match last_scanned {
                Some(block) => block + 1,
                // first window reaches back under the head to pick up
                // events a recovery pass left unconfirmed
                None => head.saturating_sub(scan_lookback),
            };
            if from <= head {
                match rpc
                    .get_logs(filter.address, filter.topic0, from, head)
                    .await
                {
                    Ok(events) => {
                        for event in events {
                            trace!(
                                "{} live scan: event at block {} log {}",
                                name,
                                event.block_number,
                                event.log_index
                            );
                            if sender.send(event).await.is_err() {
                                debug!("{} live scan: subscriber gone, stopping", name);
                                return;
                            }
                        }
                        last_scanned = Some(head);
                    }
                    Err(e) => {
                        warn!("{} live scan: log query failed: {}", name, e);
                    }
                }
            }
            sleep(SUBSCRIBE_POLL_INTERVAL).await;
        }
    }

    async fn wait_mined(&self, tx_hash: bridge_common::H256) -> Result<TxReceipt, SubmitError> {
        loop {
            match self.rpc.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {
                    trace!("{} tx {:#x} still pending", self.name, tx_hash);
                }
                Err(e) => return Err(SubmitError::transient(e)),
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Ledger for EthLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head_block(&self) -> Result<u64, RpcError> {
        self.rpc.block_number().await
    }

    async fn query_events(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>, RpcError> {
        self.rpc
            .get_logs(filter.address, filter.topic0, from_block, to_block)
            .await
    }

    async fn subscribe(&self, filter: &EventFilter) -> mpsc::Receiver<RawEvent> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        tokio::spawn(Self::scan_new_events(
            Arc::clone(&self.rpc),
            self.name.clone(),
            *filter,
            self.scan_lookback,
            sender,
        ));
        receiver
    }

    async fn submit_tx(&self, to: H160, calldata: Vec<u8>) -> Result<TxReceipt, SubmitError> {
        let _guard = self.submit_lock.lock().await;
        let from = self.key.address();

        // Preflight: reproduces a destination revert without spending gas,
        // and gives us the revert payload to classify
        if let Err(e) = self.rpc.eth_call(from, to, &calldata, None).await {
            if let Some(reason) = classify_revert(&e) {
                return Err(SubmitError::Revert(reason));
            }
            return Err(SubmitError::transient(e));
        }

        let chain_id = self
            .cached_chain_id()
            .await
            .map_err(SubmitError::transient)?;
        let nonce = self
            .rpc
            .transaction_count(from)
            .await
            .map_err(SubmitError::transient)?;
        let gas_price = self
            .rpc
            .gas_price()
            .await
            .map_err(SubmitError::transient)?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: SUBMIT_GAS_LIMIT,
            to,
            value: U256::zero(),
            data: calldata.clone(),
        };
        let raw = tx
            .sign(&self.key, chain_id)
            .map_err(SubmitError::transient)?;

        let tx_hash = match self.rpc.send_raw_transaction(&raw).await {
            Ok(hash) => hash,
            Err(e) => {
                // a revert can also surface here when the node simulates
                // before accepting into the pool
                if let Some(reason) = classify_revert(&e) {
                    return Err(SubmitError::Revert(reason));
                }
                return Err(SubmitError::transient(e));
            }
        };
        debug!("{} submitted tx {:#x} (account nonce {})", self.name, tx_hash, nonce);

        let receipt = self.wait_mined(tx_hash).await?;
        if !receipt.status {
            // mined but reverted: replay the call at the mined block to
            // recover the reason (the reverted tx left state unchanged)
            let reason = match self
                .rpc
                .eth_call(from, to, &calldata, Some(receipt.block_number))
                .await
            {
                Err(e) => classify_revert(&e)
                    .unwrap_or_else(|| super::RevertReason::Other(e.to_string())),
                Ok(_) => super::RevertReason::Other("reverted without reason".into()),
            };
            return Err(SubmitError::Revert(reason));
        }
        Ok(receipt)
    }
}
