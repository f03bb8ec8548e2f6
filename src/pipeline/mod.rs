//! Ingestion Pipeline

pub mod ingest;

pub use ingest::{dispatch, BlockPoller, PollerConfig};
