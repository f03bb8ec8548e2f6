//! JSON-RPC Chain Source
//! Mission: Pull block ranges from a standard EVM node without drama

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::chain::types::{Address, Block, Transaction};
use crate::chain::ChainSource;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Raw transaction as returned by `eth_getBlockByNumber`.
#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: String,
    from: Option<String>,
    to: Option<String>,
    value: String,
}

/// Raw block body.
#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    timestamp: String,
    transactions: Vec<RpcTransaction>,
}

/// Thin JSON-RPC client implementing [`ChainSource`].
pub struct RpcChainSource {
    client: Client,
    url: String,
}

impl RpcChainSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Single RPC call with retry and linear backoff.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_MS * attempt as u64;
                debug!(method, attempt, delay_ms = delay, "retrying rpc call");
                sleep(Duration::from_millis(delay)).await;
            }

            let sent = self.client.post(&self.url).json(&body).send().await;
            match sent {
                Ok(resp) => {
                    let payload: Value = resp
                        .json()
                        .await
                        .with_context(|| format!("Invalid JSON from {}", method))?;
                    if let Some(err) = payload.get("error").filter(|e| !e.is_null()) {
                        bail!("rpc error from {}: {}", method, err);
                    }
                    return payload
                        .get("result")
                        .cloned()
                        .with_context(|| format!("Missing result field from {}", method));
                }
                Err(e) => {
                    warn!(method, attempt, error = %e, "rpc request failed");
                    last_err = Some(e.into());
                }
            }
        }

        let cause = last_err.unwrap_or_else(|| anyhow::anyhow!("no attempt recorded"));
        Err(cause.context(format!("rpc call {} exhausted retries", method)))
    }
}

#[async_trait]
impl ChainSource for RpcChainSource {
    async fn last_known_height(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let raw = result
            .as_str()
            .context("eth_blockNumber returned non-string result")?;
        parse_hex_u64(raw)
    }

    async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity((to.saturating_sub(from) + 1) as usize);

        for number in from..=to {
            let result = self
                .call(
                    "eth_getBlockByNumber",
                    json!([format!("{:#x}", number), true]),
                )
                .await
                .with_context(|| format!("can't fetch block {}", number))?;

            let raw: RpcBlock = serde_json::from_value(result)
                .with_context(|| format!("can't decode block {}", number))?;
            blocks.push(convert_block(raw)?);
        }

        Ok(blocks)
    }
}

fn convert_block(raw: RpcBlock) -> Result<Block> {
    let number = parse_hex_u64(&raw.number)?;
    let timestamp = parse_hex_u64(&raw.timestamp)? as i64;

    let mut transactions = Vec::with_capacity(raw.transactions.len());
    for tx in raw.transactions {
        // Contract creations have no recipient and carry no clustering signal.
        let (Some(from), Some(to)) = (tx.from, tx.to) else {
            continue;
        };
        transactions.push(Transaction {
            hash: tx.hash,
            block_number: number,
            from: Address::new(from),
            to: Address::new(to),
            value: parse_hex_value(&tx.value)?,
        });
    }

    Ok(Block {
        number,
        timestamp,
        transactions,
    })
}

fn parse_hex_u64(raw: &str) -> Result<u64> {
    let trimmed = raw.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).with_context(|| format!("Invalid hex quantity: {}", raw))
}

/// Wei quantities overflow u64; decode to u128 and downcast to f64 for the
/// ratio arithmetic the heuristics run on.
fn parse_hex_value(raw: &str) -> Result<f64> {
    let trimmed = raw.trim_start_matches("0x");
    let value =
        u128::from_str_radix(trimmed, 16).with_context(|| format!("Invalid hex value: {}", raw))?;
    Ok(value as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantities_parse() {
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn values_beyond_u64_survive() {
        // 2^70 wei, representable in f64 with acceptable ratio error.
        let parsed = parse_hex_value("0x400000000000000000").unwrap();
        assert!(parsed > 1e21 && parsed < 1.2e21);
    }

    #[test]
    fn contract_creation_txs_are_skipped() {
        let raw = RpcBlock {
            number: "0xa".to_string(),
            timestamp: "0x64".to_string(),
            transactions: vec![
                RpcTransaction {
                    hash: "0x1".to_string(),
                    from: Some("0xA".to_string()),
                    to: None,
                    value: "0x1".to_string(),
                },
                RpcTransaction {
                    hash: "0x2".to_string(),
                    from: Some("0xA".to_string()),
                    to: Some("0xB".to_string()),
                    value: "0x2".to_string(),
                },
            ],
        };

        let block = convert_block(raw).unwrap();
        assert_eq!(block.number, 10);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].hash, "0x2");
    }
}
