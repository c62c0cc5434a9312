//! JSON-RPC ledger client
//!
//! Speaks the standard `eth_*` JSON-RPC methods over HTTP. RPC error
//! objects are classified into the shared taxonomy; a nonce rejection is
//! surfaced as a nonce error so callers can resynchronize and rebuild.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{parse_quantity, Address, TxHash, TxReceipt};
use super::LedgerClient;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC implementation of [`LedgerClient`]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    rpc_url: String,
    timeout_ms: u64,
    request_id: AtomicU64,
}

impl HttpLedgerClient {
    pub fn new(rpc_url: String, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build RPC client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url,
            timeout_ms,
            request_id: AtomicU64::new(1),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "ledger rpc call");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RpcTimeout(self.timeout_ms)
                } else {
                    Error::Connection(format!("{}: {}", method, e))
                }
            })?;

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Connection(format!("invalid RPC response for {}: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(classify_rpc_error(method, err));
        }

        parsed
            .result
            .ok_or_else(|| Error::Connection(format!("empty RPC result for {}", method)))
    }
}

/// Map a JSON-RPC error object onto the shared taxonomy
fn classify_rpc_error(method: &str, err: RpcError) -> Error {
    let lowered = err.message.to_lowercase();

    if lowered.contains("nonce") {
        Error::Nonce {
            address: String::new(),
            message: err.message,
        }
    } else if lowered.contains("insufficient funds") {
        Error::InsufficientBalance {
            address: String::new(),
            required: String::new(),
            available: String::new(),
        }
    } else {
        Error::Transaction(format!("{} failed ({}): {}", method, err.code, err.message))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_transaction_count(&self, address: &Address) -> Result<u64> {
        let result = self
            .rpc(
                "eth_getTransactionCount",
                json!([address.as_str(), "latest"]),
            )
            .await?;

        let raw = result.as_str().ok_or_else(|| Error::Connection(
            "eth_getTransactionCount returned non-string".to_string(),
        ))?;

        Ok(parse_quantity(raw)? as u64)
    }

    async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<TxHash> {
        let payload = format!("0x{}", hex::encode(raw_tx));
        let result = self.rpc("eth_sendRawTransaction", json!([payload])).await?;

        let raw = result.as_str().ok_or_else(|| Error::Connection(
            "eth_sendRawTransaction returned non-string".to_string(),
        ))?;

        TxHash::parse(raw)
    }

    async fn get_transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>> {
        let result = self
            .rpc("eth_getTransactionReceipt", json!([tx_hash.as_str()]))
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let status = result
            .get("status")
            .and_then(Value::as_str)
            .map(parse_quantity)
            .transpose()?
            .unwrap_or(0)
            == 1;

        let block_number = result
            .get("blockNumber")
            .and_then(Value::as_str)
            .map(parse_quantity)
            .transpose()?
            .unwrap_or(0) as u64;

        let gas_used = result
            .get("gasUsed")
            .and_then(Value::as_str)
            .map(parse_quantity)
            .transpose()?
            .unwrap_or(0) as u64;

        Ok(Some(TxReceipt {
            status,
            block_number,
            gas_used,
        }))
    }

    async fn get_gas_price(&self) -> Result<u128> {
        let result = self.rpc("eth_gasPrice", json!([])).await?;

        let raw = result
            .as_str()
            .ok_or_else(|| Error::Connection("eth_gasPrice returned non-string".to_string()))?;

        parse_quantity(raw)
    }
}
