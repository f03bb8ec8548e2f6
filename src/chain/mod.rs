//! Chain Data Access
//! Mission: Narrow interface to whatever mirrors the chain for us

pub mod rpc;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use types::{Address, Block, BlockBatch, Exchange, Transaction};

/// External chain-data collaborator.
///
/// The crawler side is out of scope; the engine only needs to know the tip
/// height and to pull block ranges. Implementations must be safe to share
/// across tasks.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Highest block the source currently knows about.
    async fn last_known_height(&self) -> Result<u64>;

    /// Fetch blocks in the inclusive range `[from, to]`.
    async fn fetch_blocks(&self, from: u64, to: u64) -> Result<Vec<Block>>;
}
