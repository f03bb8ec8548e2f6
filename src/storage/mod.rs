//! Persistence Layer

pub mod ledger;

pub use ledger::{Account, ClusterStats, LedgerStore, ResolveScope};
