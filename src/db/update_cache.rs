//! Per-transaction update buffer.
//!
//! Every mutation a transaction makes is buffered here until commit;
//! nothing reaches the log or the store earlier. Opposing updates to the
//! same fact cancel in the buffer, so a transaction that creates and then
//! deletes a property ships neither operation. Additions and deletions
//! keep their arrival order; commit replays additions first, then
//! deletions.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Result, StoreError};
use crate::model::{Edge, EdgeId, Node, NodeId};

/// What a pending update is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateTarget {
    /// A node itself.
    Node,
    /// An edge itself.
    Edge,
    /// A label on a node.
    NodeLabel,
    /// A property on a node.
    NodeProperty,
    /// A label on an edge.
    EdgeLabel,
    /// A property on an edge.
    EdgeProperty,
}

impl UpdateTarget {
    /// Single-byte wire tag.
    pub fn to_byte(self) -> u8 {
        match self {
            UpdateTarget::Node => 0,
            UpdateTarget::Edge => 1,
            UpdateTarget::NodeLabel => 2,
            UpdateTarget::NodeProperty => 3,
            UpdateTarget::EdgeLabel => 4,
            UpdateTarget::EdgeProperty => 5,
        }
    }

    /// Decodes the wire tag.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(UpdateTarget::Node),
            1 => Ok(UpdateTarget::Edge),
            2 => Ok(UpdateTarget::NodeLabel),
            3 => Ok(UpdateTarget::NodeProperty),
            4 => Ok(UpdateTarget::EdgeLabel),
            5 => Ok(UpdateTarget::EdgeProperty),
            other => Err(StoreError::Corruption(format!(
                "unknown update target tag {other}"
            ))),
        }
    }
}

/// Whether a pending update adds or removes its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The target comes into existence.
    Create,
    /// The target goes away.
    Delete,
}

/// The data a pending update carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePayload {
    /// A full node, for node creations.
    Node(Node),
    /// A full edge, for edge creations.
    Edge(Edge),
    /// A bare id, for node/edge deletions.
    Id(u64),
    /// An owner id plus a label or property key.
    Pair {
        /// Owning node or edge.
        id: u64,
        /// Label id or property key id.
        sub: u64,
    },
}

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Add or remove.
    pub kind: UpdateKind,
    /// What the update is about.
    pub target: UpdateTarget,
    /// The data it carries.
    pub payload: UpdatePayload,
}

/// Buffered state of one transaction.
#[derive(Debug, Default)]
pub struct TransactionUpdateCache {
    additions: Vec<PendingUpdate>,
    deletions: Vec<PendingUpdate>,
    created_nodes: FxHashMap<NodeId, Node>,
    created_edges: FxHashMap<EdgeId, Edge>,
    deleted_nodes: FxHashSet<NodeId>,
    deleted_edges: FxHashSet<EdgeId>,
    sub_additions: FxHashMap<UpdateTarget, FxHashMap<u64, FxHashSet<u64>>>,
    sub_deletions: FxHashMap<UpdateTarget, FxHashMap<u64, FxHashSet<u64>>>,
}

impl TransactionUpdateCache {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a node creation. A pending deletion of the same id is
    /// cancelled instead.
    pub fn create_node(&mut self, node: Node) {
        let id = node.internal_id;
        if self.deleted_nodes.remove(&id) {
            self.deletions.retain(|u| {
                !(u.target == UpdateTarget::Node && u.payload == UpdatePayload::Id(id))
            });
            return;
        }
        self.created_nodes.insert(id, node.clone());
        self.additions.push(PendingUpdate {
            kind: UpdateKind::Create,
            target: UpdateTarget::Node,
            payload: UpdatePayload::Node(node),
        });
    }

    /// Buffers a node deletion. A pending creation of the same id is
    /// cancelled instead, together with its buffered labels and
    /// properties.
    pub fn delete_node(&mut self, id: NodeId) {
        if self.created_nodes.remove(&id).is_some() {
            self.retract_owner(id, UpdateTarget::Node, UpdateTarget::NodeLabel, UpdateTarget::NodeProperty);
            return;
        }
        self.deleted_nodes.insert(id);
        self.deletions.push(PendingUpdate {
            kind: UpdateKind::Delete,
            target: UpdateTarget::Node,
            payload: UpdatePayload::Id(id),
        });
    }

    /// Buffers an edge creation. A pending deletion of the same id is
    /// cancelled instead.
    pub fn create_edge(&mut self, edge: Edge) {
        let id = edge.edge_id;
        if self.deleted_edges.remove(&id) {
            self.deletions.retain(|u| {
                !(u.target == UpdateTarget::Edge && u.payload == UpdatePayload::Id(id))
            });
            return;
        }
        self.created_edges.insert(id, edge.clone());
        self.additions.push(PendingUpdate {
            kind: UpdateKind::Create,
            target: UpdateTarget::Edge,
            payload: UpdatePayload::Edge(edge),
        });
    }

    /// Buffers an edge deletion. A pending creation of the same id is
    /// cancelled instead, together with its buffered labels and
    /// properties.
    pub fn delete_edge(&mut self, id: EdgeId) {
        if self.created_edges.remove(&id).is_some() {
            self.retract_owner(id, UpdateTarget::Edge, UpdateTarget::EdgeLabel, UpdateTarget::EdgeProperty);
            return;
        }
        self.deleted_edges.insert(id);
        self.deletions.push(PendingUpdate {
            kind: UpdateKind::Delete,
            target: UpdateTarget::Edge,
            payload: UpdatePayload::Id(id),
        });
    }

    /// Buffers a label/property addition on `id`. A matching pending
    /// removal is cancelled instead; re-adding an already pending pair
    /// is a no-op.
    pub fn add_sub(&mut self, target: UpdateTarget, id: u64, sub: u64) {
        debug_assert!(target != UpdateTarget::Node && target != UpdateTarget::Edge);
        if remove_pair(&mut self.sub_deletions, target, id, sub) {
            self.deletions.retain(|u| {
                !(u.target == target && u.payload == UpdatePayload::Pair { id, sub })
            });
            return;
        }
        if self
            .sub_additions
            .entry(target)
            .or_default()
            .entry(id)
            .or_default()
            .insert(sub)
        {
            self.additions.push(PendingUpdate {
                kind: UpdateKind::Create,
                target,
                payload: UpdatePayload::Pair { id, sub },
            });
        }
    }

    /// Buffers a label/property removal on `id`. A matching pending
    /// addition is cancelled instead.
    pub fn delete_sub(&mut self, target: UpdateTarget, id: u64, sub: u64) {
        debug_assert!(target != UpdateTarget::Node && target != UpdateTarget::Edge);
        if remove_pair(&mut self.sub_additions, target, id, sub) {
            self.additions.retain(|u| {
                !(u.target == target && u.payload == UpdatePayload::Pair { id, sub })
            });
            return;
        }
        if self
            .sub_deletions
            .entry(target)
            .or_default()
            .entry(id)
            .or_default()
            .insert(sub)
        {
            self.deletions.push(PendingUpdate {
                kind: UpdateKind::Delete,
                target,
                payload: UpdatePayload::Pair { id, sub },
            });
        }
    }

    /// True when this transaction created `id`.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.created_nodes.contains_key(&id)
    }

    /// True when this transaction deleted `id`.
    pub fn is_node_deleted(&self, id: NodeId) -> bool {
        self.deleted_nodes.contains(&id)
    }

    /// True when this transaction created `id`.
    pub fn has_edge(&self, id: EdgeId) -> bool {
        self.created_edges.contains_key(&id)
    }

    /// True when this transaction deleted `id`.
    pub fn is_edge_deleted(&self, id: EdgeId) -> bool {
        self.deleted_edges.contains(&id)
    }

    /// True when `(id, sub)` is a pending addition for `target`.
    pub fn has_sub(&self, target: UpdateTarget, id: u64, sub: u64) -> bool {
        self.sub_additions
            .get(&target)
            .and_then(|m| m.get(&id))
            .is_some_and(|s| s.contains(&sub))
    }

    /// True when this transaction added `label` to node `id`.
    pub fn node_has_label(&self, id: NodeId, label: u64) -> bool {
        self.has_sub(UpdateTarget::NodeLabel, id, label)
    }

    /// True when this transaction set property `key` on node `id`.
    pub fn node_has_property(&self, id: NodeId, key: u64) -> bool {
        self.has_sub(UpdateTarget::NodeProperty, id, key)
    }

    /// True when this transaction added `label` to edge `id`.
    pub fn edge_has_label(&self, id: EdgeId, label: u64) -> bool {
        self.has_sub(UpdateTarget::EdgeLabel, id, label)
    }

    /// True when this transaction set property `key` on edge `id`.
    pub fn edge_has_property(&self, id: EdgeId, key: u64) -> bool {
        self.has_sub(UpdateTarget::EdgeProperty, id, key)
    }

    /// Edges created by this transaction.
    pub fn created_edges(&self) -> impl Iterator<Item = &Edge> {
        self.created_edges.values()
    }

    /// Buffered additions in arrival order.
    pub fn additions(&self) -> &[PendingUpdate] {
        &self.additions
    }

    /// Buffered deletions in arrival order.
    pub fn deletions(&self) -> &[PendingUpdate] {
        &self.deletions
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }

    /// Discards everything buffered.
    pub fn clear(&mut self) {
        self.additions.clear();
        self.deletions.clear();
        self.created_nodes.clear();
        self.created_edges.clear();
        self.deleted_nodes.clear();
        self.deleted_edges.clear();
        self.sub_additions.clear();
        self.sub_deletions.clear();
    }

    /// Drops the buffered creation of `id` and every buffered label or
    /// property addition hanging off it.
    fn retract_owner(
        &mut self,
        id: u64,
        owner: UpdateTarget,
        label: UpdateTarget,
        property: UpdateTarget,
    ) {
        for target in [label, property] {
            if let Some(map) = self.sub_additions.get_mut(&target) {
                map.remove(&id);
            }
        }
        self.additions.retain(|u| match (&u.target, &u.payload) {
            (t, UpdatePayload::Node(n)) if *t == owner => n.internal_id != id,
            (t, UpdatePayload::Edge(e)) if *t == owner => e.edge_id != id,
            (t, UpdatePayload::Pair { id: owner_id, .. }) if *t == label || *t == property => {
                *owner_id != id
            }
            _ => true,
        });
    }
}

fn remove_pair(
    maps: &mut FxHashMap<UpdateTarget, FxHashMap<u64, FxHashSet<u64>>>,
    target: UpdateTarget,
    id: u64,
    sub: u64,
) -> bool {
    let Some(per_id) = maps.get_mut(&target) else {
        return false;
    };
    let Some(set) = per_id.get_mut(&id) else {
        return false;
    };
    let removed = set.remove(&sub);
    if set.is_empty() {
        per_id.remove(&id);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_delete_property_leaves_nothing() {
        let mut cache = TransactionUpdateCache::new();
        cache.add_sub(UpdateTarget::NodeProperty, 7, 99);
        cache.delete_sub(UpdateTarget::NodeProperty, 7, 99);
        assert!(cache.is_empty());
        assert!(!cache.has_sub(UpdateTarget::NodeProperty, 7, 99));
    }

    #[test]
    fn delete_then_create_label_cancels_the_deletion() {
        let mut cache = TransactionUpdateCache::new();
        cache.delete_sub(UpdateTarget::EdgeLabel, 4, 1);
        assert_eq!(cache.deletions().len(), 1);
        cache.add_sub(UpdateTarget::EdgeLabel, 4, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn deleting_a_pending_node_retracts_its_subtree() {
        let mut cache = TransactionUpdateCache::new();
        cache.create_node(Node::new(3));
        cache.add_sub(UpdateTarget::NodeLabel, 3, 10);
        cache.add_sub(UpdateTarget::NodeProperty, 3, 20);
        assert_eq!(cache.additions().len(), 3);

        cache.delete_node(3);
        assert!(cache.is_empty());
        assert!(!cache.has_node(3));
        assert!(!cache.is_node_deleted(3));
    }

    #[test]
    fn deleting_a_stored_edge_is_recorded() {
        let mut cache = TransactionUpdateCache::new();
        cache.delete_edge(100);
        assert!(cache.is_edge_deleted(100));
        assert_eq!(cache.deletions().len(), 1);
        assert_eq!(
            cache.deletions()[0].payload,
            UpdatePayload::Id(100)
        );
    }

    #[test]
    fn duplicate_additions_are_recorded_once() {
        let mut cache = TransactionUpdateCache::new();
        cache.add_sub(UpdateTarget::NodeLabel, 1, 5);
        cache.add_sub(UpdateTarget::NodeLabel, 1, 5);
        assert_eq!(cache.additions().len(), 1);
    }

    #[test]
    fn replay_order_is_arrival_order() {
        let mut cache = TransactionUpdateCache::new();
        cache.create_node(Node::new(1));
        cache.create_node(Node::new(2));
        cache.create_edge(Edge::new(1, 2, 100));
        let targets: Vec<UpdateTarget> =
            cache.additions().iter().map(|u| u.target).collect();
        assert_eq!(
            targets,
            vec![UpdateTarget::Node, UpdateTarget::Node, UpdateTarget::Edge]
        );
    }
}
