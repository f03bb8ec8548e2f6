//! Cluster Resolver
//! Mission: Turn one same-entity relation into exactly one partition mutation

use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::chain::types::Address;
use crate::cluster::partition::ClusterId;
use crate::cluster::Relation;
use crate::storage::ledger::{LedgerStore, ResolveScope};

/// What a resolver call did to the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Created(ClusterId),
    ExtendedLeft(ClusterId),
    ExtendedRight(ClusterId),
    Merged(ClusterId),
    Noop,
}

impl ResolveOutcome {
    pub fn cluster(&self) -> Option<ClusterId> {
        match self {
            Self::Created(id)
            | Self::ExtendedLeft(id)
            | Self::ExtendedRight(id)
            | Self::Merged(id) => Some(*id),
            Self::Noop => None,
        }
    }
}

/// Decides, for one relation, how to mutate the partition.
///
/// The whole decision — both membership reads and the mutation they select —
/// runs inside one store resolve scope, so concurrent callers touching the
/// same addresses serialize instead of acting on stale cluster ids.
pub struct ClusterResolver {
    store: Arc<LedgerStore>,
}

impl ClusterResolver {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Apply one relation. Exactly one case fires:
    ///
    /// 1. sender clustered, deposit not: fold deposit + its co-senders into
    ///    the sender's cluster (extend-left)
    /// 2. sender not, deposit clustered: fold sender + its co-deposits into
    ///    the deposit's cluster (extend-right)
    /// 3. both clustered, different ids: merge the two clusters
    /// 4. both clustered, same id: no-op
    /// 5. neither clustered: create a cluster seeded with the pair plus every
    ///    address the expansion queries already tie to the same deposit
    ///    pattern
    pub fn resolve(&self, relation: &Relation) -> Result<ResolveOutcome> {
        let outcome = self.store.resolve_scope(|scope| {
            let sender = scope.account(&relation.sender).with_context(|| {
                format!(
                    "can't resolve sender of relation {} -> {}",
                    relation.sender, relation.deposit
                )
            })?;
            let deposit = scope.account(&relation.deposit).with_context(|| {
                format!(
                    "can't resolve deposit of relation {} -> {}",
                    relation.sender, relation.deposit
                )
            })?;

            match (sender.cluster, deposit.cluster) {
                (Some(id), None) => {
                    let mut members = vec![relation.deposit.clone()];
                    members.extend(scope.expand_senders(&relation.deposit, &relation.sender)?);
                    let id = fold_into(scope, id, &members)?;
                    Ok(ResolveOutcome::ExtendedLeft(id))
                }
                (None, Some(id)) => {
                    let mut members = vec![relation.sender.clone()];
                    members.extend(
                        scope.expand_deposits(
                            std::slice::from_ref(&relation.sender),
                            &relation.deposit,
                        )?,
                    );
                    let id = fold_into(scope, id, &members)?;
                    Ok(ResolveOutcome::ExtendedRight(id))
                }
                (Some(a), Some(b)) if a != b => {
                    // The pair already widened when it entered the partition;
                    // re-running the expansion here would double-widen.
                    Ok(ResolveOutcome::Merged(scope.merge_clusters(a, b)?))
                }
                (Some(_), Some(_)) => Ok(ResolveOutcome::Noop),
                (None, None) => {
                    let co_senders =
                        scope.expand_senders(&relation.deposit, &relation.sender)?;

                    let mut all_senders = co_senders.clone();
                    all_senders.push(relation.sender.clone());
                    let co_deposits =
                        scope.expand_deposits(&all_senders, &relation.deposit)?;

                    let id = scope.create_cluster()?;
                    let mut members =
                        vec![relation.sender.clone(), relation.deposit.clone()];
                    members.extend(co_senders);
                    members.extend(co_deposits);
                    let id = fold_into(scope, id, &members)?;
                    Ok(ResolveOutcome::Created(id))
                }
            }
        })?;

        let stats = self.store.stats();
        match outcome {
            ResolveOutcome::Created(_) => {
                stats.clusters_created.fetch_add(1, Ordering::Relaxed);
            }
            ResolveOutcome::ExtendedLeft(_) | ResolveOutcome::ExtendedRight(_) => {
                stats.extensions.fetch_add(1, Ordering::Relaxed);
            }
            ResolveOutcome::Merged(_) => {
                stats.merges.fetch_add(1, Ordering::Relaxed);
            }
            ResolveOutcome::Noop => {
                stats.noops.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(
            sender = %relation.sender,
            deposit = %relation.deposit,
            outcome = ?outcome,
            "relation resolved"
        );

        Ok(outcome)
    }
}

/// Fold `members` into cluster `target`.
///
/// Unclustered members are added; a member a previous relation already placed
/// in another cluster is itself same-entity evidence, so that cluster is
/// merged in rather than the member being re-owned. Returns the surviving id.
fn fold_into(scope: &ResolveScope<'_>, target: ClusterId, members: &[Address]) -> Result<ClusterId> {
    let mut target = target;
    let mut to_add = Vec::new();

    for member in members {
        match scope.account(member)?.cluster {
            None => to_add.push(member.clone()),
            Some(id) if id == target => {}
            Some(foreign) => {
                target = scope.merge_clusters(target, foreign)?;
            }
        }
    }

    scope.add_to_cluster(target, &to_add)?;
    Ok(target)
}
