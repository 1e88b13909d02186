//! Wait-For Graph built from a global snapshot
//!
//! This module implements a directed wait-for graph (WFG) between clients.
//! An edge `A -> B` means client A is suspended waiting for a resource that
//! client B holds. A cycle in this graph is a deadlock.
//!
//! # How it works
//!
//! The graph is rebuilt from scratch for every snapshot. Owners are looked up
//! in the snapshot's own owned-sets, never in the live lock table, so the graph
//! is exactly as consistent as the snapshot it came from. Cycle search is a
//! depth-first traversal that keeps an on-stack marker per node; meeting an
//! on-stack node closes a cycle, and the portion of the current path from that
//! node onwards is the cycle in wait order.

use crate::core::error::SnapshotAnomaly;
use crate::core::snapshot::GlobalSnapshot;
use crate::core::types::{ClientId, ResourceId};
use fxhash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Represents a directed graph of client wait relationships
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    /// Every client in the snapshot, ascending; drives traversal order
    nodes: Vec<ClientId>,
    /// Maps a client to the clients it is waiting for (outgoing edges)
    edges: FxHashMap<ClientId, Vec<ClientId>>,
}

impl WaitForGraph {
    /// Create a new empty wait-for graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for one snapshot
    ///
    /// # Returns
    /// The graph plus every coherence violation in the snapshot. Waits that
    /// cannot become a trustworthy edge are dropped from the graph: waits on a
    /// resource nobody owns, on one the waiter owns itself, or on one claimed
    /// by more than one client.
    pub fn from_snapshot(snapshot: &GlobalSnapshot) -> (Self, Vec<SnapshotAnomaly>) {
        let mut graph = WaitForGraph::new();
        let anomalies = snapshot.anomalies();
        let owners = snapshot.owners();

        let contested: FxHashSet<ResourceId> = anomalies
            .iter()
            .filter_map(|anomaly| match anomaly {
                SnapshotAnomaly::DoubleOwnership { resource, .. } => Some(*resource),
                _ => None,
            })
            .collect();

        for client in &snapshot.clients {
            graph.add_node(client.id);
        }

        for (client, resource) in snapshot.waiters() {
            if contested.contains(&resource) {
                continue;
            }
            if let Some(&owner) = owners.get(&resource)
                && owner != client
            {
                graph.add_edge(client, owner);
            }
        }

        (graph, anomalies)
    }

    pub fn add_node(&mut self, client: ClientId) {
        if let Err(pos) = self.nodes.binary_search(&client) {
            self.nodes.insert(pos, client);
        }
    }

    /// Add a directed edge: `from` waits for `to`
    ///
    /// # Returns
    /// `false` if the edge was a self-loop (rejected) or already present
    pub fn add_edge(&mut self, from: ClientId, to: ClientId) -> bool {
        if from == to {
            return false;
        }
        self.add_node(from);
        self.add_node(to);

        let targets = self.edges.entry(from).or_default();
        match targets.binary_search(&to) {
            Ok(_) => false,
            Err(pos) => {
                targets.insert(pos, to);
                true
            }
        }
    }

    /// All edges, ordered by source then target
    pub fn edges(&self) -> Vec<(ClientId, ClientId)> {
        self.nodes
            .iter()
            .flat_map(|&from| {
                self.edges
                    .get(&from)
                    .into_iter()
                    .flatten()
                    .map(move |&to| (from, to))
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }

    pub fn successors(&self, client: ClientId) -> &[ClientId] {
        self.edges.get(&client).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find the first cycle, starting from the lowest client id
    ///
    /// # Returns
    /// * `Some(cycle)` - clients in wait order; the last waits for the first
    /// * `None` - the graph is acyclic
    pub fn find_cycle(&self) -> Option<Vec<ClientId>> {
        let mut marks: FxHashMap<ClientId, Mark> = FxHashMap::default();
        // (node, index of the next successor to visit)
        let mut stack: Vec<(ClientId, usize)> = Vec::new();
        let mut path: Vec<ClientId> = Vec::new();

        for &root in &self.nodes {
            if marks.contains_key(&root) {
                continue;
            }
            marks.insert(root, Mark::OnStack);
            stack.push((root, 0));
            path.push(root);

            while let Some(top) = stack.last_mut() {
                let (node, next) = *top;
                top.1 += 1;
                if let Some(&succ) = self.successors(node).get(next) {
                    match marks.get(&succ) {
                        Some(Mark::OnStack) => {
                            let start = path.iter().position(|&c| c == succ)?;
                            return Some(path[start..].to_vec());
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(succ, Mark::OnStack);
                            stack.push((succ, 0));
                            path.push(succ);
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    path.pop();
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::ClientSnapshot;

    /// Rotate a cycle so it starts at its smallest member
    fn normalized(mut cycle: Vec<ClientId>) -> Vec<ClientId> {
        let min_pos = cycle
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| **c)
            .map(|(i, _)| i)
            .unwrap();
        cycle.rotate_left(min_pos);
        cycle
    }

    #[test]
    fn test_three_client_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(2, 3);
        graph.add_edge(3, 1);
        graph.add_edge(1, 2);
        let cycle = graph.find_cycle().expect("cycle");
        assert_eq!(normalized(cycle), vec![1, 2, 3]);
    }

    #[test]
    fn test_chain_is_acyclic() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = WaitForGraph::new();
        assert!(!graph.add_edge(4, 4));
        assert!(graph.is_empty());
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_duplicate_edge_ignored() {
        let mut graph = WaitForGraph::new();
        assert!(graph.add_edge(1, 2));
        assert!(!graph.add_edge(1, 2));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_cycle_reached_through_tail() {
        // 1 -> 2 -> 3 -> 4 -> 2 : the cycle excludes the tail node 1
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 4);
        graph.add_edge(4, 2);
        assert_eq!(graph.find_cycle().unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn test_diamond_without_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(1, 3);
        graph.add_edge(2, 4);
        graph.add_edge(3, 4);
        assert!(graph.find_cycle().is_none());
        assert_eq!(graph.edges(), vec![(1, 2), (1, 3), (2, 4), (3, 4)]);
    }

    #[test]
    fn test_from_snapshot_builds_edges() {
        // 1 holds r0 waits r1; 2 holds r1 waits r2; 3 holds r2 waits r0
        let snapshot = GlobalSnapshot::from_clients(
            1,
            vec![
                ClientSnapshot::new(1, vec![0], Some(1)),
                ClientSnapshot::new(2, vec![1], Some(2)),
                ClientSnapshot::new(3, vec![2], Some(0)),
                ClientSnapshot::new(4, vec![], None),
            ],
        );
        let (graph, anomalies) = WaitForGraph::from_snapshot(&snapshot);
        assert!(anomalies.is_empty());
        assert_eq!(graph.edges(), vec![(1, 2), (2, 3), (3, 1)]);
        assert_eq!(graph.find_cycle().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_from_snapshot_drops_orphan_wait() {
        let snapshot = GlobalSnapshot::from_clients(
            1,
            vec![
                ClientSnapshot::new(1, vec![], Some(3)),
                ClientSnapshot::new(2, vec![0], Some(0)),
            ],
        );
        let (graph, anomalies) = WaitForGraph::from_snapshot(&snapshot);
        assert!(graph.is_empty());
        assert_eq!(
            anomalies,
            vec![
                SnapshotAnomaly::OrphanWait {
                    client: 1,
                    resource: 3
                },
                SnapshotAnomaly::SelfWait {
                    client: 2,
                    resource: 0
                },
            ]
        );
    }

    #[test]
    fn test_from_snapshot_drops_waits_on_double_owned_resource() {
        // 1 and 2 both claim r0; 3 waits for r0; 4 waits for r1 held by 1
        let snapshot = GlobalSnapshot::from_clients(
            1,
            vec![
                ClientSnapshot::new(1, vec![0, 1], None),
                ClientSnapshot::new(2, vec![0], None),
                ClientSnapshot::new(3, vec![], Some(0)),
                ClientSnapshot::new(4, vec![], Some(1)),
            ],
        );
        let (graph, anomalies) = WaitForGraph::from_snapshot(&snapshot);
        assert_eq!(
            anomalies,
            vec![SnapshotAnomaly::DoubleOwnership {
                resource: 0,
                first: 1,
                second: 2
            }]
        );
        assert_eq!(graph.edges(), vec![(4, 1)]);
    }
}
