//! Partition Snapshots
//! Mission: Immutable cluster snapshots that merge the same way in any order

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::chain::types::{Address, Exchange};

pub type ClusterId = i64;

/// A full disjoint-set snapshot: every clustered address appears in exactly
/// one cluster. Produced by one heuristic run, immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    clusters: BTreeMap<ClusterId, BTreeSet<Address>>,
}

/// Record format for export: one cluster per record, member order irrelevant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub members: BTreeSet<Address>,
}

/// Node/edge metadata for the external graph renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub address: Address,
    pub cluster: ClusterId,
    /// Exchange display name when the address belongs to a known exchange.
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: Address,
    pub to: Address,
}

impl Partition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw (address, cluster id) assignments, e.g. a store scan.
    pub fn from_assignments<I>(assignments: I) -> Self
    where
        I: IntoIterator<Item = (Address, ClusterId)>,
    {
        let mut clusters: BTreeMap<ClusterId, BTreeSet<Address>> = BTreeMap::new();
        for (address, id) in assignments {
            clusters.entry(id).or_default().insert(address);
        }
        Self { clusters }
    }

    pub fn from_records(records: Vec<ClusterRecord>) -> Self {
        let mut clusters = BTreeMap::new();
        for record in records {
            clusters.insert(record.id, record.members);
        }
        Self { clusters }
    }

    pub fn to_records(&self) -> Vec<ClusterRecord> {
        self.clusters
            .iter()
            .map(|(id, members)| ClusterRecord {
                id: *id,
                members: members.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster_of(&self, address: &Address) -> Option<ClusterId> {
        self.clusters
            .iter()
            .find(|(_, members)| members.contains(address))
            .map(|(id, _)| *id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = (&ClusterId, &BTreeSet<Address>)> {
        self.clusters.iter()
    }

    /// Membership-set equality, insensitive to cluster ids.
    pub fn same_membership(&self, other: &Partition) -> bool {
        let sets = |p: &Partition| -> BTreeSet<BTreeSet<Address>> {
            p.clusters.values().cloned().collect()
        };
        sets(self) == sets(other)
    }

    /// Coarsest partition consistent with both inputs.
    ///
    /// Every input cluster is treated as same-entity evidence and folded
    /// through a union-find, so the operation is commutative and associative:
    /// folding N partitions in any order yields the same membership sets.
    /// Output cluster ids are renumbered densely and carry no relation to the
    /// input ids.
    pub fn merge(&self, other: &Partition) -> Partition {
        let mut uf = UnionFind::new();

        for partition in [self, other] {
            for members in partition.clusters.values() {
                let mut iter = members.iter();
                let Some(first) = iter.next() else { continue };
                let root = uf.insert(first.clone());
                for address in iter {
                    let idx = uf.insert(address.clone());
                    uf.union(root, idx);
                }
            }
        }

        let mut grouped: BTreeMap<usize, BTreeSet<Address>> = BTreeMap::new();
        for (address, idx) in uf.entries() {
            grouped.entry(uf.find(idx)).or_default().insert(address);
        }

        let clusters = grouped
            .into_values()
            .enumerate()
            .map(|(i, members)| (i as ClusterId + 1, members))
            .collect();

        Partition { clusters }
    }

    /// Rendering metadata for the out-of-scope visualization collaborator.
    ///
    /// Each cluster becomes a star rooted at its first member; exchange
    /// addresses get their registry name as a label. Singleton clusters are
    /// included only when `include_singletons` is set.
    pub fn graph_export(&self, exchanges: &[Exchange], include_singletons: bool) -> GraphExport {
        let labels: HashMap<&Address, &str> = exchanges
            .iter()
            .map(|e| (&e.address, e.name.as_str()))
            .collect();

        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        for (id, members) in &self.clusters {
            if members.len() < 2 && !include_singletons {
                continue;
            }

            let mut iter = members.iter();
            let Some(root) = iter.next() else { continue };

            nodes.push(GraphNode {
                address: root.clone(),
                cluster: *id,
                label: labels.get(root).map(|s| s.to_string()),
            });
            for member in iter {
                nodes.push(GraphNode {
                    address: member.clone(),
                    cluster: *id,
                    label: labels.get(member).map(|s| s.to_string()),
                });
                edges.push(GraphEdge {
                    from: root.clone(),
                    to: member.clone(),
                });
            }
        }

        GraphExport { nodes, edges }
    }
}

/// Array-backed union-find with path halving and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
    index: HashMap<Address, usize>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::new(),
            size: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn insert(&mut self, address: Address) -> usize {
        if let Some(&idx) = self.index.get(&address) {
            return idx;
        }
        let idx = self.parent.len();
        self.parent.push(idx);
        self.size.push(1);
        self.index.insert(address, idx);
        idx
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            self.parent[idx] = self.parent[self.parent[idx]];
            idx = self.parent[idx];
        }
        idx
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }

    fn entries(&self) -> Vec<(Address, usize)> {
        self.index
            .iter()
            .map(|(addr, &idx)| (addr.clone(), idx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    fn partition(groups: &[&[&str]]) -> Partition {
        Partition::from_records(
            groups
                .iter()
                .enumerate()
                .map(|(i, members)| ClusterRecord {
                    id: i as ClusterId + 1,
                    members: members.iter().map(|m| addr(m)).collect(),
                })
                .collect(),
        )
    }

    #[test]
    fn merge_links_clusters_sharing_an_address() {
        let p1 = partition(&[&["a", "b"]]);
        let p2 = partition(&[&["b", "c"]]);

        let merged = p1.merge(&p2);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.cluster_of(&addr("a")), merged.cluster_of(&addr("c")));
    }

    #[test]
    fn merge_keeps_unrelated_clusters_apart() {
        let p1 = partition(&[&["a", "b"]]);
        let p2 = partition(&[&["c", "d"]]);

        let merged = p1.merge(&p2);
        assert_eq!(merged.len(), 2);
        assert_ne!(merged.cluster_of(&addr("a")), merged.cluster_of(&addr("c")));
    }

    #[test]
    fn merge_is_commutative_and_associative() {
        let p1 = partition(&[&["a", "b"], &["x", "y"]]);
        let p2 = partition(&[&["b", "c"]]);
        let p3 = partition(&[&["c", "d"], &["y", "z"]]);

        let left = p1.merge(&p2).merge(&p3);
        let right = p1.merge(&p2.merge(&p3));
        let swapped = p3.merge(&p1).merge(&p2);

        assert!(left.same_membership(&right));
        assert!(left.same_membership(&swapped));

        // a-b-c-d transitively linked, x-y-z likewise.
        assert_eq!(left.len(), 2);
        assert_eq!(left.cluster_of(&addr("a")), left.cluster_of(&addr("d")));
        assert_eq!(left.cluster_of(&addr("x")), left.cluster_of(&addr("z")));
    }

    #[test]
    fn merge_treats_absent_addresses_as_singletons() {
        let p1 = partition(&[&["a", "b"]]);
        let p2 = partition(&[&["q"]]);

        let merged = p1.merge(&p2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.cluster_of(&addr("a")), merged.cluster_of(&addr("b")));
        assert!(merged.cluster_of(&addr("q")).is_some());
    }

    #[test]
    fn record_round_trip_reproduces_membership() {
        let original = partition(&[&["a", "b", "c"], &["d"]]);

        let json = serde_json::to_string(&original.to_records()).unwrap();
        let records: Vec<ClusterRecord> = serde_json::from_str(&json).unwrap();
        let restored = Partition::from_records(records);

        assert!(original.same_membership(&restored));
    }

    #[test]
    fn graph_export_skips_singletons_unless_asked() {
        let p = partition(&[&["a", "b"], &["c"]]);

        let without = p.graph_export(&[], false);
        assert_eq!(without.nodes.len(), 2);
        assert_eq!(without.edges.len(), 1);

        let with = p.graph_export(&[], true);
        assert_eq!(with.nodes.len(), 3);
    }

    #[test]
    fn graph_export_labels_exchanges() {
        let p = partition(&[&["0xdep", "0xex"]]);
        let exchanges = vec![Exchange {
            name: "TestEx".to_string(),
            address: addr("0xex"),
        }];

        let export = p.graph_export(&exchanges, false);
        let labelled: Vec<_> = export.nodes.iter().filter(|n| n.label.is_some()).collect();
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].address, addr("0xex"));
    }
}
