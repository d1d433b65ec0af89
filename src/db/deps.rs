//! Transaction dependency tracking and deadlock victim selection.

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graphmap::DiGraphMap;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::model::TxId;

/// Directed wait-for graph over transaction ids.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraphMap<TxId, ()>,
}

impl DependencyGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transaction vertex.
    pub fn add_node(&mut self, tx: TxId) {
        self.graph.add_node(tx);
    }

    /// Removes a transaction vertex and all its edges.
    pub fn delete_node(&mut self, tx: TxId) {
        self.graph.remove_node(tx);
    }

    /// Adds a waits-for edge and reports whether the graph now has a
    /// cycle.
    pub fn add_directed_edge(&mut self, from: TxId, to: TxId) -> bool {
        self.graph.add_edge(from, to, ());
        is_cyclic_directed(&self.graph)
    }

    /// Transactions currently on some cycle: members of non-trivial
    /// strongly connected components, plus self-loops.
    pub fn cycle_nodes(&self) -> Vec<TxId> {
        let mut nodes = Vec::new();
        for component in tarjan_scc(&self.graph) {
            if component.len() > 1 {
                nodes.extend(component);
            } else if let [tx] = component[..] {
                if self.graph.contains_edge(tx, tx) {
                    nodes.push(tx);
                }
            }
        }
        nodes
    }

    /// Number of transactions `tx` is waiting on.
    pub fn out_degree(&self, tx: TxId) -> usize {
        self.graph.edges(tx).count()
    }
}

/// Wait-for bookkeeping for the set of live transactions.
#[derive(Debug, Default)]
pub struct DependencyManager {
    graph: DependencyGraph,
    /// True once the transaction has committed or rolled back.
    finished: FxHashMap<TxId, bool>,
}

impl DependencyManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live transaction.
    pub fn add_transaction(&mut self, tx: TxId) {
        self.finished.insert(tx, false);
        self.graph.add_node(tx);
    }

    /// Marks a transaction as no longer eligible for victim selection.
    pub fn mark_finished(&mut self, tx: TxId) {
        if let Some(flag) = self.finished.get_mut(&tx) {
            *flag = true;
        }
    }

    /// Forgets a transaction entirely.
    pub fn remove_transaction(&mut self, tx: TxId) {
        self.finished.remove(&tx);
        self.graph.delete_node(tx);
    }

    /// Number of transactions still tracked.
    pub fn tracked_transactions(&self) -> usize {
        self.finished.len()
    }

    /// Records that `from` waits on `to`. If that closes a cycle, picks
    /// and returns a victim: the unfinished cycle member with strictly
    /// highest out-degree, first found winning ties. Aborting the victim
    /// is the caller's duty. `None` means the cycle exists but every
    /// member already finished, so nothing needs aborting.
    pub fn add_dependency(&mut self, from: TxId, to: TxId) -> Option<TxId> {
        if !self.graph.add_directed_edge(from, to) {
            return None;
        }
        let mut victim: Option<(TxId, usize)> = None;
        for tx in self.graph.cycle_nodes() {
            if self.finished.get(&tx).copied().unwrap_or(true) {
                continue;
            }
            let degree = self.graph.out_degree(tx);
            match victim {
                Some((_, best)) if degree <= best => {}
                _ => victim = Some((tx, degree)),
            }
        }
        let victim = victim.map(|(tx, _)| tx);
        match victim {
            Some(tx) => warn!(from, to, victim = tx, "deadlock detected, victim selected"),
            None => warn!(from, to, "deadlock among finished transactions, nothing to abort"),
        }
        victim
    }
}
