//! entityscope — batch entity resolution over a mirrored chain
//! Mission: One consistent partition of the address space, whatever order the
//! evidence arrives in

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use entityscope::{
    chain::rpc::RpcChainSource,
    chain::types::Transaction,
    cluster::Partition,
    heuristics::{DepositReuse, Heuristic},
    models::{load_exchanges, Config, PartitionExport},
    pipeline::{BlockPoller, PollerConfig},
    storage::ledger::LedgerStore,
};

#[derive(Debug, Parser)]
#[command(name = "entityscope", about = "Entity clustering over chain history")]
struct Args {
    /// Run one clustering pass over the persisted history and exit.
    #[arg(long)]
    once: bool,

    /// Override DATABASE_PATH.
    #[arg(long)]
    db: Option<String>,

    /// Override EXPORT_DIR.
    #[arg(long)]
    export_dir: Option<String>,

    /// Override RPC_URL.
    #[arg(long)]
    rpc_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(db) = args.db {
        config.database_path = db;
    }
    if let Some(dir) = args.export_dir {
        config.export_dir = dir;
    }
    if let Some(url) = args.rpc_url {
        config.rpc_url = url;
    }

    let store = Arc::new(LedgerStore::open(&config.database_path)?);

    // Exchange registry: file entries are merged into the store; a store
    // without any registered exchange can't cluster anything.
    if Path::new(&config.exchanges_path).exists() {
        let exchanges = load_exchanges(&config.exchanges_path)?;
        store.register_exchanges(&exchanges)?;
        info!(count = exchanges.len(), "exchange registry loaded");
    }
    if store.exchanges()?.is_empty() {
        bail!(
            "no exchanges registered; provide {} or seed the store",
            config.exchanges_path
        );
    }

    let heuristics: Vec<Arc<dyn Heuristic>> = vec![Arc::new(DepositReuse::new(
        store.clone(),
        config.block_window,
        config.amount_ratio,
    ))];

    if args.once {
        info!("single-pass mode: clustering persisted history");
        let txs = store.transactions_from(0)?;
        run_and_export(&store, &heuristics, txs, &config).await?;
        info!(stats = %store.stats().summary(), "done");
        return Ok(());
    }

    let (notify_tx, mut notify_rx) = mpsc::channel(config.notify_queue_size);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let source = Arc::new(RpcChainSource::new(&config.rpc_url)?);
    let poller = BlockPoller::new(
        source,
        store.clone(),
        PollerConfig {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            min_batch_blocks: config.min_batch_blocks,
        },
    );
    let poller_handle = poller.spawn(notify_tx, shutdown_rx);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("entityscope running; waiting for block batches");

    while let Some(batch) = notify_rx.recv().await {
        info!(
            from_block = batch.from_block,
            to_block = batch.to_block,
            "clustering new batch"
        );
        // A failed run terminates this batch's export step only; the pipeline
        // keeps polling and completed partitions were already exported.
        if let Err(e) = run_and_export(&store, &heuristics, batch.transactions(), &config).await {
            error!(error = ?e, "clustering run failed");
        }
    }

    match poller_handle.await {
        Ok(result) => result.context("block poller failed")?,
        Err(e) => warn!(error = %e, "block poller task panicked or was cancelled"),
    }

    info!(stats = %store.stats().summary(), "entityscope stopped");
    Ok(())
}

/// Run every heuristic concurrently over `txs`, export each completed
/// partition, then export the merged partition and its graph metadata.
///
/// A heuristic failure does not discard sibling partitions that completed:
/// they are exported and merged first, and the first error is returned after.
async fn run_and_export(
    store: &Arc<LedgerStore>,
    heuristics: &[Arc<dyn Heuristic>],
    txs: Vec<Transaction>,
    config: &Config,
) -> Result<()> {
    let run_id = Uuid::new_v4();
    let txs = Arc::new(txs);

    let handles: Vec<_> = heuristics
        .iter()
        .map(|heuristic| {
            let heuristic = heuristic.clone();
            let txs = txs.clone();
            tokio::spawn(async move {
                let name = heuristic.name();
                (name, heuristic.run(&txs).await)
            })
        })
        .collect();

    let mut completed: Vec<(&'static str, Partition)> = Vec::new();
    let mut first_error: Option<anyhow::Error> = None;

    for handle in handles {
        let (name, result) = handle.await.context("heuristic task panicked")?;
        match result {
            Ok(partition) => {
                info!(heuristic = name, clusters = partition.len(), "heuristic finished");
                completed.push((name, partition));
            }
            Err(e) => {
                error!(heuristic = name, error = ?e, "heuristic failed");
                if first_error.is_none() {
                    first_error = Some(e.context(format!("heuristic {} failed", name)));
                }
            }
        }
    }

    for (name, partition) in &completed {
        let path = export_path(&config.export_dir, &format!("{}.json", name));
        write_export(&path, &PartitionExport::new(run_id, *name, partition))?;
    }

    if let Some(merged) = completed
        .iter()
        .map(|(_, p)| p.clone())
        .reduce(|acc, p| acc.merge(&p))
    {
        let all_path = export_path(&config.export_dir, "all.json");
        write_export(&all_path, &PartitionExport::new(run_id, "merged", &merged))?;

        let exchanges = store.exchanges()?;
        let graph = merged.graph_export(&exchanges, config.include_singletons);
        let graph_path = export_path(&config.export_dir, "graph.json");
        write_export(&graph_path, &graph)?;

        info!(
            clusters = merged.len(),
            %run_id,
            "merged partition exported"
        );
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn export_path(dir: &str, file: &str) -> PathBuf {
    Path::new(dir).join(file)
}

fn write_export<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() && !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("can't write {}", path.display()))?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entityscope=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
