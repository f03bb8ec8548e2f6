//! Chain Value Types
//! Mission: One canonical representation of addresses, transactions and blocks

use serde::{Deserialize, Serialize};

/// Lowercase hex account address.
///
/// All addresses entering the engine are normalised through this newtype so
/// that membership comparisons never depend on checksum casing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

// Deserialization routes through here so file and wire inputs are normalised
// the same way as constructed addresses.
impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// A single value transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub value: f64,
}

/// A block with its transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
}

/// One poller batch handed to the clustering stage.
#[derive(Debug, Clone)]
pub struct BlockBatch {
    pub from_block: u64,
    pub to_block: u64,
    pub blocks: Vec<Block>,
}

impl BlockBatch {
    pub fn new(blocks: Vec<Block>) -> Self {
        let from_block = blocks.iter().map(|b| b.number).min().unwrap_or(0);
        let to_block = blocks.iter().map(|b| b.number).max().unwrap_or(0);
        Self {
            from_block,
            to_block,
            blocks,
        }
    }

    /// Flatten the batch into its transactions, block order preserved.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.blocks
            .iter()
            .flat_map(|b| b.transactions.iter().cloned())
            .collect()
    }
}

/// A known exchange-owned address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub address: Address,
}
