//! Entity Clustering Core
//! Mission: Keep a consistent disjoint partition of addresses while noisy
//! same-entity evidence arrives in any order

pub mod partition;
pub mod resolver;

use serde::{Deserialize, Serialize};

use crate::chain::types::Address;

pub use partition::{ClusterId, ClusterRecord, GraphExport, Partition};
pub use resolver::{ClusterResolver, ResolveOutcome};

/// One same-entity hypothesis: the sender of a deposit leg and the deposit
/// address it funded. Consumed once by the resolver, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub sender: Address,
    pub deposit: Address,
    pub evidence: RelationEvidence,
}

/// Why the detector believes the two addresses share a controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEvidence {
    pub deposit_tx: String,
    pub exchange_tx: String,
    pub deposit_value: f64,
    pub exchange_value: f64,
}
