//! Block Ingestion
//! Mission: Keep the local mirror current without ever stalling on a slow
//! consumer

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::chain::types::BlockBatch;
use crate::chain::ChainSource;
use crate::storage::ledger::LedgerStore;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub min_batch_blocks: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            min_batch_blocks: 10,
        }
    }
}

/// Hand a batch to the clustering stage without blocking.
///
/// Overflow policy is drop-newest: when the consumer has not drained the
/// previous batch, this batch is discarded and logged. The poller stays live;
/// a lagging consumer permanently misses the dropped range. Returns whether
/// the batch was delivered.
pub fn dispatch(notify: &mpsc::Sender<BlockBatch>, batch: BlockBatch) -> bool {
    let (from_block, to_block) = (batch.from_block, batch.to_block);
    match notify.try_send(batch) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            error!(
                from_block,
                to_block, "notification queue full, dropping block batch"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            warn!("clustering consumer gone, dropping block batch");
            false
        }
    }
}

/// Long-lived polling task: watches the chain source, persists new blocks in
/// batches and notifies the clustering stage.
pub struct BlockPoller<S: ChainSource> {
    source: Arc<S>,
    store: Arc<LedgerStore>,
    config: PollerConfig,
}

impl<S: ChainSource + 'static> BlockPoller<S> {
    pub fn new(source: Arc<S>, store: Arc<LedgerStore>, config: PollerConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Spawn the polling loop. It runs until `shutdown` flips to true or the
    /// store refuses a batch; transient source errors are logged and retried
    /// on the next tick.
    pub fn spawn(
        self,
        notify: mpsc::Sender<BlockBatch>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(notify, shutdown))
    }

    async fn run(
        self,
        notify: mpsc::Sender<BlockBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut cursor = self.store.last_block_number()?.unwrap_or(0);
        let mut tick = interval(self.config.poll_interval);

        info!(cursor, "block poller started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("block poller stopping");
                        return Ok(());
                    }
                    continue;
                }
                _ = tick.tick() => {}
            }

            let height = match self.source.last_known_height().await {
                Ok(h) => h,
                Err(e) => {
                    warn!(error = %e, "height poll failed");
                    continue;
                }
            };

            if height.saturating_sub(cursor) < self.config.min_batch_blocks {
                continue;
            }

            let blocks = match self.source.fetch_blocks(cursor + 1, height).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, from = cursor + 1, to = height, "block fetch failed");
                    continue;
                }
            };

            // Persistence failures are not transient; end the task with the
            // error instead of silently skipping ranges.
            self.store
                .insert_blocks(&blocks)
                .with_context(|| format!("can't persist blocks {}..={}", cursor + 1, height))?;

            dispatch(&notify, BlockBatch::new(blocks));
            cursor = height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::types::Block;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeSource {
        height: AtomicU64,
    }

    #[async_trait]
    impl ChainSource for FakeSource {
        async fn last_known_height(&self) -> Result<u64> {
            Ok(self.height.load(Ordering::Relaxed))
        }

        async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<Block>> {
            Ok((from..=to)
                .map(|number| Block {
                    number,
                    timestamp: number as i64,
                    transactions: Vec::new(),
                })
                .collect())
        }
    }

    fn batch(from: u64, to: u64) -> BlockBatch {
        BlockBatch::new(
            (from..=to)
                .map(|number| Block {
                    number,
                    timestamp: 0,
                    transactions: Vec::new(),
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn dispatch_drops_when_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);

        assert!(dispatch(&tx, batch(1, 10)));
        // Consumer has not drained; the next batch is dropped, not queued.
        assert!(!dispatch(&tx, batch(11, 20)));

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.to_block, 10);

        // Queue drained, delivery works again.
        assert!(dispatch(&tx, batch(21, 30)));
    }

    #[tokio::test]
    async fn dispatch_does_not_block_on_closed_consumer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!dispatch(&tx, batch(1, 10)));
    }

    #[tokio::test]
    async fn poller_batches_persists_and_notifies() {
        let source = Arc::new(FakeSource {
            height: AtomicU64::new(25),
        });
        let store = Arc::new(LedgerStore::open_memory().unwrap());
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = BlockPoller::new(
            source,
            store.clone(),
            PollerConfig {
                poll_interval: Duration::from_millis(10),
                min_batch_blocks: 10,
            },
        );
        let handle = poller.spawn(tx, shutdown_rx);

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poller never notified")
            .unwrap();
        assert_eq!(batch.from_block, 1);
        assert_eq!(batch.to_block, 25);
        assert_eq!(store.last_block_number().unwrap(), Some(25));

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller ignored shutdown")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn poller_waits_for_minimum_batch() {
        let source = Arc::new(FakeSource {
            height: AtomicU64::new(5),
        });
        let store = Arc::new(LedgerStore::open_memory().unwrap());
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = BlockPoller::new(
            source.clone(),
            store,
            PollerConfig {
                poll_interval: Duration::from_millis(10),
                min_batch_blocks: 10,
            },
        );
        let handle = poller.spawn(tx, shutdown_rx);

        // Below the threshold nothing is emitted.
        let early = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(early.is_err());

        // Once the source advances past the threshold a batch arrives.
        source.height.store(12, Ordering::Relaxed);
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poller never notified")
            .unwrap();
        assert_eq!(batch.to_block, 12);

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
