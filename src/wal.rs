//! Typed write-ahead log.
//!
//! One ring file in queue discipline: commit appends entries at the
//! back, apply and recovery consume from the front. Replay order is
//! append order; there is no deduplication or compaction. Each ring
//! element is `[1-byte op kind][payload]`.

use std::convert::TryInto;
use std::path::PathBuf;

use crate::error::{Result, StoreError};
use crate::model::{Edge, EdgeId, Node, NodeId};
use crate::primitives::ring::{RingFile, RingFileBuilder};

/// Soft capacity applied when none is configured.
pub const DEFAULT_WAL_CAPACITY: u64 = 4096;

const OP_NODE_CREATE: u8 = 0;
const OP_NODE_DELETE: u8 = 1;
const OP_NODE_PROP_CREATE: u8 = 2;
const OP_NODE_PROP_DELETE: u8 = 3;
const OP_NODE_PROP_UPDATE: u8 = 4;
const OP_EDGE_CREATE: u8 = 5;
const OP_EDGE_DELETE: u8 = 6;
const OP_EDGE_PROP_CREATE: u8 = 7;
const OP_EDGE_PROP_DELETE: u8 = 8;
const OP_EDGE_PROP_UPDATE: u8 = 9;

/// One logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalEntry {
    /// A node came into existence.
    NodeCreate(Node),
    /// A node was deleted.
    NodeDelete(NodeId),
    /// A property was attached to a node.
    NodePropertyCreate {
        /// Owning node.
        node: NodeId,
        /// Opaque property bytes, carried as-is.
        payload: Vec<u8>,
    },
    /// A node property was removed.
    NodePropertyDelete {
        /// Owning node.
        node: NodeId,
        /// Opaque property bytes, carried as-is.
        payload: Vec<u8>,
    },
    /// A node property changed value.
    NodePropertyUpdate {
        /// Owning node.
        node: NodeId,
        /// Opaque property bytes, carried as-is.
        payload: Vec<u8>,
    },
    /// An edge came into existence.
    EdgeCreate(Edge),
    /// An edge was deleted.
    EdgeDelete(EdgeId),
    /// A property was attached to an edge.
    EdgePropertyCreate {
        /// Owning edge.
        edge: EdgeId,
        /// Opaque property bytes, carried as-is.
        payload: Vec<u8>,
    },
    /// An edge property was removed.
    EdgePropertyDelete {
        /// Owning edge.
        edge: EdgeId,
        /// Opaque property bytes, carried as-is.
        payload: Vec<u8>,
    },
    /// An edge property changed value.
    EdgePropertyUpdate {
        /// Owning edge.
        edge: EdgeId,
        /// Opaque property bytes, carried as-is.
        payload: Vec<u8>,
    },
}

impl WalEntry {
    fn encode(&self) -> Vec<u8> {
        match self {
            WalEntry::NodeCreate(node) => tagged(OP_NODE_CREATE, &node.to_bytes()),
            WalEntry::NodeDelete(id) => tagged(OP_NODE_DELETE, &id.to_be_bytes()),
            WalEntry::NodePropertyCreate { node, payload } => {
                prop_entry(OP_NODE_PROP_CREATE, *node, payload)
            }
            WalEntry::NodePropertyDelete { node, payload } => {
                prop_entry(OP_NODE_PROP_DELETE, *node, payload)
            }
            WalEntry::NodePropertyUpdate { node, payload } => {
                prop_entry(OP_NODE_PROP_UPDATE, *node, payload)
            }
            WalEntry::EdgeCreate(edge) => tagged(OP_EDGE_CREATE, &edge.to_bytes()),
            WalEntry::EdgeDelete(id) => tagged(OP_EDGE_DELETE, &id.to_be_bytes()),
            WalEntry::EdgePropertyCreate { edge, payload } => {
                prop_entry(OP_EDGE_PROP_CREATE, *edge, payload)
            }
            WalEntry::EdgePropertyDelete { edge, payload } => {
                prop_entry(OP_EDGE_PROP_DELETE, *edge, payload)
            }
            WalEntry::EdgePropertyUpdate { edge, payload } => {
                prop_entry(OP_EDGE_PROP_UPDATE, *edge, payload)
            }
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let (&kind, rest) = bytes
            .split_first()
            .ok_or_else(|| StoreError::Corruption("empty log entry".into()))?;
        match kind {
            OP_NODE_CREATE => Ok(WalEntry::NodeCreate(Node::from_bytes(rest)?)),
            OP_NODE_DELETE => Ok(WalEntry::NodeDelete(decode_id(rest)?)),
            OP_NODE_PROP_CREATE => {
                let (node, payload) = decode_prop(rest)?;
                Ok(WalEntry::NodePropertyCreate { node, payload })
            }
            OP_NODE_PROP_DELETE => {
                let (node, payload) = decode_prop(rest)?;
                Ok(WalEntry::NodePropertyDelete { node, payload })
            }
            OP_NODE_PROP_UPDATE => {
                let (node, payload) = decode_prop(rest)?;
                Ok(WalEntry::NodePropertyUpdate { node, payload })
            }
            OP_EDGE_CREATE => Ok(WalEntry::EdgeCreate(Edge::from_bytes(rest)?)),
            OP_EDGE_DELETE => Ok(WalEntry::EdgeDelete(decode_id(rest)?)),
            OP_EDGE_PROP_CREATE => {
                let (edge, payload) = decode_prop(rest)?;
                Ok(WalEntry::EdgePropertyCreate { edge, payload })
            }
            OP_EDGE_PROP_DELETE => {
                let (edge, payload) = decode_prop(rest)?;
                Ok(WalEntry::EdgePropertyDelete { edge, payload })
            }
            OP_EDGE_PROP_UPDATE => {
                let (edge, payload) = decode_prop(rest)?;
                Ok(WalEntry::EdgePropertyUpdate { edge, payload })
            }
            other => Err(StoreError::Corruption(format!(
                "unknown log entry kind {other}"
            ))),
        }
    }
}

fn tagged(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(kind);
    buf.extend_from_slice(payload);
    buf
}

fn prop_entry(kind: u8, id: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + payload.len());
    buf.push(kind);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .get(..8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| StoreError::Corruption("log entry id truncated".into()))?;
    Ok(u64::from_be_bytes(arr))
}

fn decode_prop(bytes: &[u8]) -> Result<(u64, Vec<u8>)> {
    let id = decode_id(bytes)?;
    Ok((id, bytes[8..].to_vec()))
}

/// Durable operation log over one ring file.
#[derive(Debug)]
pub struct WriteAheadLog {
    ring: RingFile,
    max_size: u64,
}

impl WriteAheadLog {
    /// Opens (or creates) the log. `zero` controls whether consumed
    /// regions of the backing ring are wiped as they are released.
    pub fn open(path: impl Into<PathBuf>, max_size: u64, sync: bool, zero: bool) -> Result<Self> {
        let ring = RingFileBuilder::new(path).sync(sync).zero(zero).open()?;
        Ok(Self { ring, max_size })
    }

    /// Appends one entry at the back of the log.
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        self.ring.push(&entry.encode())
    }

    /// True when the log has grown past its soft capacity. Appends are
    /// never refused; the caller decides when to force a flush.
    pub fn is_full(&self) -> bool {
        self.ring.used_bytes() >= self.max_size
    }

    /// True when no entries are pending.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Decodes and removes the oldest pending entry.
    pub fn dequeue_next(&mut self) -> Result<Option<WalEntry>> {
        match self.ring.pop_front()? {
            Some(bytes) => WalEntry::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Decoded scan of all pending entries, oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = Result<WalEntry>> + '_ {
        self.ring
            .iter()
            .map(|element| element.and_then(|bytes| WalEntry::decode(&bytes)))
    }

    /// Discards all pending entries.
    pub fn clear(&mut self) -> Result<()> {
        self.ring.clear()
    }

    /// Forces buffered entries to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.ring.sync()
    }
}
