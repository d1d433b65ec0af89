//! Transaction lifecycle.
//!
//! A transaction buffers all of its mutations in a
//! [`TransactionUpdateCache`]; nothing touches the log or the store
//! before commit. Commit replays the buffer through the write-ahead
//! log and the apply path in order, additions before deletions, so a
//! crash mid-commit leaves a replayable log tail rather than a torn
//! store. Dropping an active transaction rolls it back.

use tracing::{debug, info, warn};

use crate::db::update_cache::{
    PendingUpdate, TransactionUpdateCache, UpdateKind, UpdatePayload, UpdateTarget,
};
use crate::db::GraphStore;
use crate::error::{Result, StoreError};
use crate::model::{Direction, Edge, EdgeId, Node, NodeId, TxId};
use crate::storage::idgen::IdGenerator;
use crate::wal::WalEntry;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting operations.
    Active,
    /// Durably applied.
    Committed,
    /// Discarded.
    RolledBack,
}

/// A cursor over id-generator ranges.
///
/// Ids are taken one at a time from the current range; the unused
/// remainder goes back to the generator when the transaction finishes.
#[derive(Debug, Default, Clone, Copy)]
struct RangeCursor {
    low: u64,
    high: u64,
}

impl RangeCursor {
    fn next(&mut self, generator: &mut IdGenerator) -> Result<u64> {
        if self.low == self.high {
            let (low, high) = generator.get_id_range()?;
            self.low = low;
            self.high = high;
        }
        let id = self.low;
        self.low += 1;
        Ok(id)
    }

    fn release(&mut self, generator: &mut IdGenerator) -> Result<()> {
        if self.low < self.high {
            generator.return_id_range(self.low, self.high)?;
        }
        self.low = 0;
        self.high = 0;
        Ok(())
    }
}

/// One unit of atomically applied work against a [`GraphStore`].
#[derive(Debug)]
pub struct Transaction<'db> {
    db: &'db mut GraphStore,
    id: TxId,
    state: TxState,
    cache: TransactionUpdateCache,
    node_cursor: RangeCursor,
    edge_cursor: RangeCursor,
}

impl<'db> Transaction<'db> {
    pub(crate) fn begin(db: &'db mut GraphStore, id: TxId) -> Self {
        db.deps.add_transaction(id);
        debug!(tx_id = id, "transaction started");
        Self {
            db,
            id,
            state: TxState::Active,
            cache: TransactionUpdateCache::new(),
            node_cursor: RangeCursor::default(),
            edge_cursor: RangeCursor::default(),
        }
    }

    /// This transaction's id.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(StoreError::InvalidArgument(format!(
                "transaction {} is no longer active",
                self.id
            )));
        }
        Ok(())
    }

    /// Buffers a new node and returns its id.
    pub fn create_node(&mut self) -> Result<NodeId> {
        self.ensure_active()?;
        let id = self.node_cursor.next(&mut self.db.node_ids)?;
        let mut node = Node::new(id);
        node.creating_tx = self.id as i64;
        self.cache.create_node(node);
        Ok(id)
    }

    /// Buffers a new edge between two nodes and returns its id.
    pub fn create_edge(
        &mut self,
        source: NodeId,
        neighbour: NodeId,
        direction: Direction,
    ) -> Result<EdgeId> {
        self.ensure_active()?;
        let id = self.edge_cursor.next(&mut self.db.edge_ids)?;
        let mut edge = Edge::with_direction(source, neighbour, id, direction);
        edge.creating_tx = self.id as i64;
        self.cache.create_edge(edge);
        Ok(id)
    }

    /// Buffers a node deletion.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        self.ensure_active()?;
        self.cache.delete_node(id);
        Ok(())
    }

    /// Buffers an edge deletion.
    pub fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        self.ensure_active()?;
        self.cache.delete_edge(id);
        Ok(())
    }

    /// Buffers a label addition on a node.
    pub fn add_node_label(&mut self, node: NodeId, label: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.add_sub(UpdateTarget::NodeLabel, node, label);
        Ok(())
    }

    /// Buffers a label removal on a node.
    pub fn remove_node_label(&mut self, node: NodeId, label: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.delete_sub(UpdateTarget::NodeLabel, node, label);
        Ok(())
    }

    /// Buffers a property write on a node.
    pub fn set_node_property(&mut self, node: NodeId, key: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.add_sub(UpdateTarget::NodeProperty, node, key);
        Ok(())
    }

    /// Buffers a property removal on a node.
    pub fn remove_node_property(&mut self, node: NodeId, key: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.delete_sub(UpdateTarget::NodeProperty, node, key);
        Ok(())
    }

    /// Buffers a label addition on an edge.
    pub fn add_edge_label(&mut self, edge: EdgeId, label: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.add_sub(UpdateTarget::EdgeLabel, edge, label);
        Ok(())
    }

    /// Buffers a label removal on an edge.
    pub fn remove_edge_label(&mut self, edge: EdgeId, label: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.delete_sub(UpdateTarget::EdgeLabel, edge, label);
        Ok(())
    }

    /// Buffers a property write on an edge.
    pub fn set_edge_property(&mut self, edge: EdgeId, key: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.add_sub(UpdateTarget::EdgeProperty, edge, key);
        Ok(())
    }

    /// Buffers a property removal on an edge.
    pub fn remove_edge_property(&mut self, edge: EdgeId, key: u64) -> Result<()> {
        self.ensure_active()?;
        self.cache.delete_sub(UpdateTarget::EdgeProperty, edge, key);
        Ok(())
    }

    /// Edges of `node` as this transaction sees them: the store's live
    /// adjacency minus pending deletions, plus pending creations.
    ///
    /// Stored records carry no direction, so edges read back from the
    /// store report `Bidirectional`; pending edges keep the direction
    /// they were created with, flipped when viewed from the other end.
    pub fn get_edges(&self, node: NodeId) -> Result<Vec<Edge>> {
        self.ensure_active()?;
        let mut edges = Vec::new();
        for rel_id in self.db.store.node_relationships(node)? {
            if self.cache.is_edge_deleted(rel_id) {
                continue;
            }
            let Some(rec) = self.db.store.get_record(rel_id)? else {
                continue;
            };
            let neighbour = if rec.first_node == node {
                rec.second_node
            } else {
                rec.first_node
            };
            edges.push(Edge::new(node, neighbour, rel_id));
        }
        for edge in self.cache.created_edges() {
            if edge.source == node {
                edges.push(edge.clone());
            } else if edge.neighbour == node {
                let mut flipped = edge.clone();
                flipped.source = node;
                flipped.neighbour = edge.source;
                flipped.direction = edge.direction.reversed();
                edges.push(flipped);
            }
        }
        Ok(edges)
    }

    /// Durably applies everything buffered.
    ///
    /// Each update is appended to the write-ahead log before it touches
    /// the store, so a crash mid-commit leaves an un-applied log tail
    /// that the next open replays. On failure the buffer is discarded
    /// and the store is left to that replay.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        match self.commit_updates() {
            Ok((additions, deletions)) => {
                self.state = TxState::Committed;
                self.db.deps.remove_transaction(self.id);
                info!(tx_id = self.id, additions, deletions, "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.cache.clear();
                self.state = TxState::RolledBack;
                self.db.deps.remove_transaction(self.id);
                warn!(
                    tx_id = self.id,
                    error = %err,
                    "commit failed, store repair left to log replay"
                );
                Err(err)
            }
        }
    }

    fn commit_updates(&mut self) -> Result<(usize, usize)> {
        for update in self.cache.additions() {
            let entry = wal_entry(update)?;
            self.db.wal.append(&entry)?;
            self.db.apply(&entry)?;
        }
        for update in self.cache.deletions() {
            let entry = wal_entry(update)?;
            self.db.wal.append(&entry)?;
            self.db.apply(&entry)?;
        }
        self.db.store.sync()?;
        self.db.wal.clear()?;

        let counts = (self.cache.additions().len(), self.cache.deletions().len());
        self.cache.clear();
        self.node_cursor.release(&mut self.db.node_ids)?;
        self.edge_cursor.release(&mut self.db.edge_ids)?;
        Ok(counts)
    }

    /// Discards everything buffered and hands back unused ids.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.finish_rollback()
    }

    fn finish_rollback(&mut self) -> Result<()> {
        self.cache.clear();
        self.state = TxState::RolledBack;
        self.db.deps.remove_transaction(self.id);
        self.node_cursor.release(&mut self.db.node_ids)?;
        self.edge_cursor.release(&mut self.db.edge_ids)?;
        debug!(tx_id = self.id, "transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            if let Err(err) = self.finish_rollback() {
                warn!(tx_id = self.id, error = %err, "rollback on drop failed");
            }
        }
    }
}

/// The log form of one buffered update.
///
/// Labels have no dedicated log kinds; they ride the property entries
/// with the label id as the payload.
fn wal_entry(update: &PendingUpdate) -> Result<WalEntry> {
    let entry = match (&update.kind, &update.target, &update.payload) {
        (UpdateKind::Create, UpdateTarget::Node, UpdatePayload::Node(node)) => {
            WalEntry::NodeCreate(node.clone())
        }
        (UpdateKind::Delete, UpdateTarget::Node, UpdatePayload::Id(id)) => {
            WalEntry::NodeDelete(*id)
        }
        (UpdateKind::Create, UpdateTarget::Edge, UpdatePayload::Edge(edge)) => {
            WalEntry::EdgeCreate(edge.clone())
        }
        (UpdateKind::Delete, UpdateTarget::Edge, UpdatePayload::Id(id)) => {
            WalEntry::EdgeDelete(*id)
        }
        (kind, UpdateTarget::NodeLabel | UpdateTarget::NodeProperty, UpdatePayload::Pair { id, sub }) => {
            let payload = sub.to_be_bytes().to_vec();
            match kind {
                UpdateKind::Create => WalEntry::NodePropertyCreate { node: *id, payload },
                UpdateKind::Delete => WalEntry::NodePropertyDelete { node: *id, payload },
            }
        }
        (kind, UpdateTarget::EdgeLabel | UpdateTarget::EdgeProperty, UpdatePayload::Pair { id, sub }) => {
            let payload = sub.to_be_bytes().to_vec();
            match kind {
                UpdateKind::Create => WalEntry::EdgePropertyCreate { edge: *id, payload },
                UpdateKind::Delete => WalEntry::EdgePropertyDelete { edge: *id, payload },
            }
        }
        (kind, target, payload) => {
            return Err(StoreError::InvalidArgument(format!(
                "malformed pending update: {kind:?} {target:?} {payload:?}"
            )));
        }
    };
    Ok(entry)
}
