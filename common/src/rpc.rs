//! Minimal JSON-RPC 2.0 client for EVM-style ledger endpoints over HTTP.
//! Only the handful of methods the relayer needs are exposed as typed
//! helpers; everything goes through a single `call` entry point.

use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use primitive_types::{H160, H256, U256};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::types::{RawEvent, TxReceipt};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("node error {code}: {message}")]
    Node {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    // Revert payload attached by the node to an execution error, when present.
    // Nodes disagree on the exact shape: either a bare hex string or an
    // object with a nested "data" field.
    pub fn revert_data(&self) -> Option<Vec<u8>> {
        let RpcError::Node { data, .. } = self else {
            return None;
        };
        let raw = match data.as_ref()? {
            Value::String(s) => s.clone(),
            Value::Object(map) => map.get("data")?.as_str()?.to_string(),
            _ => return None,
        };
        hex::decode(raw.trim_start_matches("0x")).ok()
    }

    pub fn node_message(&self) -> Option<&str> {
        match self {
            RpcError::Node { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<NodeError>,
}

#[derive(Deserialize)]
struct NodeError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

// Log entry as returned by eth_getLogs. Pending entries carry null
// block numbers and are skipped.
#[derive(Deserialize)]
struct LogEntry {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    #[serde(rename = "transactionHash")]
    transaction_hash: Option<String>,
    #[serde(rename = "logIndex")]
    log_index: Option<String>,
}

#[derive(Deserialize)]
struct ReceiptEntry {
    status: Option<String>,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}

pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        trace!("rpc call {} -> {}", method, self.url);
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let envelope: Envelope = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        envelope
            .result
            .ok_or_else(|| RpcError::InvalidResponse(format!("{}: no result and no error", method)))
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&result)
    }

    pub async fn gas_price(&self) -> Result<U256, RpcError> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        parse_u256(&result)
    }

    // Account nonce including pending transactions, for strictly-increasing
    // nonce assignment on the submit path
    pub async fn transaction_count(&self, address: H160) -> Result<u64, RpcError> {
        let result = self
            .call(
                "eth_getTransactionCount",
                json!([format!("{:#x}", address), "pending"]),
            )
            .await?;
        parse_quantity(&result)
    }

    // Inclusive range scan for logs matching (address, topic0),
    // returned in ascending (block, log index) order
    pub async fn get_logs(
        &self,
        address: H160,
        topic0: H256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>, RpcError> {
        let result = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": format!("{:#x}", address),
                    "topics": [format!("{:#x}", topic0)],
                    "fromBlock": quantity(from_block),
                    "toBlock": quantity(to_block),
                }]),
            )
            .await?;

        let entries: Vec<LogEntry> = serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("eth_getLogs: {}", e)))?;

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            // not yet mined, will come back in a later scan
            let (Some(block_number), Some(tx_hash)) =
                (entry.block_number.as_ref(), entry.transaction_hash.as_ref())
            else {
                continue;
            };
            events.push(RawEvent {
                address: parse_address(&entry.address)?,
                topics: entry
                    .topics
                    .iter()
                    .map(|t| parse_hash(t))
                    .collect::<Result<_, _>>()?,
                data: parse_bytes(&entry.data)?,
                block_number: parse_quantity_str(block_number)?,
                tx_hash: parse_hash(tx_hash)?,
                log_index: entry
                    .log_index
                    .as_deref()
                    .map(parse_quantity_str)
                    .transpose()?
                    .unwrap_or(0),
            });
        }
        events.sort_by_key(|e| e.ordering_key());
        Ok(events)
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, RpcError> {
        let result = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        result
            .as_str()
            .map(parse_hash)
            .transpose()?
            .ok_or_else(|| RpcError::InvalidResponse("eth_sendRawTransaction: not a hash".into()))
    }

    // None while the transaction is still pending
    pub async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>, RpcError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([format!("{:#x}", tx_hash)]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let entry: ReceiptEntry = serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("eth_getTransactionReceipt: {}", e)))?;
        let Some(block_number) = entry.block_number.as_deref() else {
            return Ok(None);
        };
        Ok(Some(TxReceipt {
            tx_hash: parse_hash(&entry.transaction_hash)?,
            block_number: parse_quantity_str(block_number)?,
            // pre-Byzantium nodes omit status entirely; treat as success
            status: entry
                .status
                .as_deref()
                .map(|s| parse_quantity_str(s).map(|v| v == 1))
                .transpose()?
                .unwrap_or(true),
        }))
    }

    // Simulate a call. Execution reverts surface as node errors carrying
    // the revert payload, which the caller classifies.
    pub async fn eth_call(
        &self,
        from: H160,
        to: H160,
        data: &[u8],
        block: Option<u64>,
    ) -> Result<Vec<u8>, RpcError> {
        let at = match block {
            Some(number) => Value::String(quantity(number)),
            None => Value::String("latest".into()),
        };
        let result = self
            .call(
                "eth_call",
                json!([{
                    "from": format!("{:#x}", from),
                    "to": format!("{:#x}", to),
                    "data": format!("0x{}", hex::encode(data)),
                }, at]),
            )
            .await?;
        result
            .as_str()
            .map(parse_bytes)
            .transpose()?
            .ok_or_else(|| RpcError::InvalidResponse("eth_call: not a byte string".into()))
    }
}

pub fn quantity(value: u64) -> String {
    format!("{:#x}", value)
}

fn parse_quantity(value: &Value) -> Result<u64, RpcError> {
    value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("expected quantity, got {}", value)))
        .and_then(parse_quantity_str)
}

fn parse_quantity_str(s: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {}: {}", s, e)))
}

fn parse_u256(value: &Value) -> Result<U256, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("expected quantity, got {}", value)))?;
    U256::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {}: {}", s, e)))
}

fn parse_bytes(s: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| RpcError::InvalidResponse(format!("bad byte string {}: {}", s, e)))
}

fn parse_hash(s: &str) -> Result<H256, RpcError> {
    let bytes = parse_bytes(s)?;
    if bytes.len() != 32 {
        return Err(RpcError::InvalidResponse(format!(
            "expected 32-byte hash, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_address(s: &str) -> Result<H160, RpcError> {
    let bytes = parse_bytes(s)?;
    if bytes.len() != 20 {
        return Err(RpcError::InvalidResponse(format!(
            "expected 20-byte address, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H160::from_slice(&bytes))
}
