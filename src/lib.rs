//! entityscope — entity resolution over a chain's address space.
//!
//! Groups addresses that are probably controlled by the same actor into
//! disjoint clusters: heuristics emit same-entity relations, a persistent
//! union-find keeps the partition consistent, and independently produced
//! partitions fold into one coarsest result.

pub mod chain;
pub mod cluster;
pub mod heuristics;
pub mod models;
pub mod pipeline;
pub mod storage;
