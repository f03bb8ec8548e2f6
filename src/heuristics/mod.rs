//! Clustering Heuristics
//! Mission: Scan transaction history and emit same-entity evidence

pub mod deposit_reuse;

use anyhow::Result;
use async_trait::async_trait;

use crate::chain::types::Transaction;
use crate::cluster::Partition;

pub use deposit_reuse::{DepositReuse, ExchangeTransfer};

/// One entity-resolution heuristic.
///
/// The deposit-reuse implementation lives in this crate; the airdrop and
/// self-authorization detectors are external collaborators that implement
/// the same trait and hand the engine their partition snapshot.
#[async_trait]
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run over one batch of transactions and return the resulting partition
    /// snapshot. Runs to completion or fails; mid-run cancellation is not
    /// supported.
    async fn run(&self, txs: &[Transaction]) -> Result<Partition>;
}
