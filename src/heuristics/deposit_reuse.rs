//! Deposit Reuse Heuristic
//! Mission: Addresses funneling similar amounts through the same exchange
//! deposit address share a controller

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::chain::types::Transaction;
use crate::cluster::{ClusterResolver, Partition, Relation, RelationEvidence};
use crate::heuristics::Heuristic;
use crate::storage::ledger::LedgerStore;

/// Default backward search window, in blocks.
pub const DEFAULT_BLOCK_WINDOW: u64 = 10_000;

/// Default amount tolerance between the deposit leg and the exchange leg.
pub const DEFAULT_AMOUNT_RATIO: f64 = 1.5;

/// A matched (deposit-in, exchange-in) transaction pair.
#[derive(Debug, Clone)]
pub struct ExchangeTransfer {
    pub deposit_leg: Transaction,
    pub exchange_leg: Transaction,
}

/// The deposit-reuse detector.
///
/// Pairs exchange-bound transfers with the transaction that funded the
/// deposit address they came from, then feeds the resulting (sender, deposit)
/// relations to the resolver one at a time, in emission order.
pub struct DepositReuse {
    store: Arc<LedgerStore>,
    resolver: ClusterResolver,
    block_window: u64,
    amount_ratio: f64,
}

impl DepositReuse {
    pub fn new(store: Arc<LedgerStore>, block_window: u64, amount_ratio: f64) -> Self {
        let resolver = ClusterResolver::new(store.clone());
        Self {
            store,
            resolver,
            block_window,
            amount_ratio,
        }
    }

    /// Match each exchange-bound transfer in `txs` with its deposit leg.
    fn exchange_transfers(&self, txs: &[Transaction]) -> Result<Vec<ExchangeTransfer>> {
        let exchanges = self.store.exchange_addresses()?;
        let to_exchange = self
            .store
            .txs_to_exchanges(txs)
            .context("can't get txs to exchange")?;

        let mut transfers = Vec::new();
        for exchange_leg in to_exchange {
            // An exchange shuffling funds between its own accounts is not a
            // deposit.
            if exchanges.contains(&exchange_leg.from) {
                continue;
            }

            let leg = self
                .store
                .deposit_leg(&exchange_leg, self.block_window, self.amount_ratio)
                .with_context(|| {
                    format!("can't get exchange transfer for {}", exchange_leg.hash)
                })?;

            match leg {
                Some(deposit_leg) => transfers.push(ExchangeTransfer {
                    deposit_leg,
                    exchange_leg,
                }),
                None => debug!(
                    tx = %exchange_leg.hash,
                    deposit = %exchange_leg.from,
                    "no deposit leg within window, skipping"
                ),
            }
        }

        Ok(transfers)
    }

    fn relation_for(transfer: &ExchangeTransfer) -> Relation {
        Relation {
            sender: transfer.deposit_leg.from.clone(),
            deposit: transfer.deposit_leg.to.clone(),
            evidence: RelationEvidence {
                deposit_tx: transfer.deposit_leg.hash.clone(),
                exchange_tx: transfer.exchange_leg.hash.clone(),
                deposit_value: transfer.deposit_leg.value,
                exchange_value: transfer.exchange_leg.value,
            },
        }
    }
}

#[async_trait]
impl Heuristic for DepositReuse {
    fn name(&self) -> &'static str {
        "deposit-reuse"
    }

    async fn run(&self, txs: &[Transaction]) -> Result<Partition> {
        let transfers = self
            .exchange_transfers(txs)
            .context("can't get exchange transfers")?;

        info!(
            transfers = transfers.len(),
            scanned = txs.len(),
            "deposit-reuse matching complete"
        );

        for transfer in &transfers {
            let relation = Self::relation_for(transfer);
            self.resolver.resolve(&relation).with_context(|| {
                format!(
                    "can't cluster exchange transfer {} -> {}",
                    transfer.deposit_leg.hash, transfer.exchange_leg.hash
                )
            })?;
        }

        info!(stats = %self.store.stats().summary(), "deposit-reuse clustering complete");

        self.store.snapshot_partition()
    }
}
