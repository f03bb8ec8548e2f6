use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::chain::types::Exchange;
use crate::cluster::partition::ClusterRecord;
use crate::cluster::Partition;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub rpc_url: String,
    pub exchanges_path: String,
    pub export_dir: String,
    pub poll_interval_secs: u64,
    pub min_batch_blocks: u64,
    pub notify_queue_size: usize,
    pub block_window: u64,
    pub amount_ratio: f64,
    pub include_singletons: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./entityscope.db".to_string());

        let rpc_url =
            std::env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());

        let exchanges_path =
            std::env::var("EXCHANGES_PATH").unwrap_or_else(|_| "./exchanges.json".to_string());

        let export_dir = std::env::var("EXPORT_DIR").unwrap_or_else(|_| ".".to_string());

        let poll_interval_secs = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let min_batch_blocks = std::env::var("MIN_BATCH_BLOCKS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let notify_queue_size = std::env::var("NOTIFY_QUEUE_SIZE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);

        let block_window = std::env::var("CLUSTER_BLOCK_WINDOW")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .unwrap_or(10_000);

        let amount_ratio = std::env::var("CLUSTER_AMOUNT_RATIO")
            .unwrap_or_else(|_| "1.5".to_string())
            .parse()
            .unwrap_or(1.5);

        let include_singletons = std::env::var("INCLUDE_SINGLETONS")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        Ok(Self {
            database_path,
            rpc_url,
            exchanges_path,
            export_dir,
            poll_interval_secs,
            min_batch_blocks,
            notify_queue_size,
            block_window,
            amount_ratio,
            include_singletons,
        })
    }
}

/// Load the exchange registry file: a JSON array of `{ "name", "address" }`.
pub fn load_exchanges(path: impl AsRef<Path>) -> Result<Vec<Exchange>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("can't read exchange registry {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("can't parse exchange registry {}", path.display()))
}

/// On-disk form of one heuristic's (or the merged) partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionExport {
    pub run_id: Uuid,
    pub heuristic: String,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub clusters: Vec<ClusterRecord>,
}

impl PartitionExport {
    pub fn new(run_id: Uuid, heuristic: impl Into<String>, partition: &Partition) -> Self {
        Self {
            run_id,
            heuristic: heuristic.into(),
            generated_at: chrono::Utc::now(),
            clusters: partition.to_records(),
        }
    }

    pub fn into_partition(self) -> Partition {
        Partition::from_records(self.clusters)
    }
}
