use std::convert::TryInto;

use crate::error::{Result, StoreError};

/// Stable storage key for a node.
pub type NodeId = u64;
/// Stable storage key for a relationship.
pub type EdgeId = u64;
/// Identifier of a live transaction.
pub type TxId = u64;

/// Sentinel for "no transaction" in the create/delete bookkeeping fields.
pub const NO_TX: i64 = -1;

const NODE_WIRE_LEN: usize = 17;
const EDGE_WIRE_LEN: usize = 26;

/// Traversal direction of a relationship relative to its source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edge points at the source node.
    Incoming,
    /// Edge points away from the source node.
    Outgoing,
    /// Edge is addressable identically from both endpoints.
    Bidirectional,
}

impl Direction {
    /// Single-byte wire tag.
    pub fn to_byte(self) -> u8 {
        match self {
            Direction::Incoming => b'0',
            Direction::Outgoing => b'1',
            Direction::Bidirectional => b'2',
        }
    }

    /// The same relationship as seen from the other endpoint.
    pub fn reversed(self) -> Self {
        match self {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
            Direction::Bidirectional => Direction::Bidirectional,
        }
    }

    /// Decodes the wire tag; unknown bytes are a corruption signal.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            b'0' => Ok(Direction::Incoming),
            b'1' => Ok(Direction::Outgoing),
            b'2' => Ok(Direction::Bidirectional),
            other => Err(StoreError::Corruption(format!(
                "unknown direction tag: 0x{other:02X}"
            ))),
        }
    }
}

/// A graph node.
///
/// The internal id is the stable storage key. The external id is a
/// transient display/lookup alias kept by the external key-value
/// collaborator and is never persisted with the node itself; it still
/// travels in the wire form so the WAL can reconstruct lookups on replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Stable storage key.
    pub internal_id: NodeId,
    /// Transient alias, `u64::MAX` when unset.
    pub external_id: u64,
    /// Transaction that created this node, `NO_TX` when unknown.
    pub creating_tx: i64,
    /// Transaction that logically deleted this node, `NO_TX` while live.
    pub deleting_tx: i64,
}

impl Node {
    /// A fresh node owned by no transaction.
    pub fn new(internal_id: NodeId) -> Self {
        Self {
            internal_id,
            external_id: u64::MAX,
            creating_tx: NO_TX,
            deleting_tx: NO_TX,
        }
    }

    /// Wire form: `[len:1][internal id:8][external id:8]`, big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(NODE_WIRE_LEN);
        buf.push(NODE_WIRE_LEN as u8);
        buf.extend_from_slice(&self.internal_id.to_be_bytes());
        buf.extend_from_slice(&self.external_id.to_be_bytes());
        buf
    }

    /// Decodes the wire form. Transaction bookkeeping fields are not part
    /// of the wire form and come back as `NO_TX`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NODE_WIRE_LEN {
            return Err(StoreError::Corruption("node payload truncated".into()));
        }
        let internal_id = u64::from_be_bytes(bytes[1..9].try_into().expect("8-byte slice"));
        let external_id = u64::from_be_bytes(bytes[9..17].try_into().expect("8-byte slice"));
        Ok(Self {
            internal_id,
            external_id,
            creating_tx: NO_TX,
            deleting_tx: NO_TX,
        })
    }
}

/// A relationship as seen from one endpoint.
///
/// Storage is undirected-symmetric: every relationship is addressable from
/// both endpoints, so `source` here is whichever endpoint the edge was
/// fetched through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The endpoint this view was taken from.
    pub source: NodeId,
    /// The other endpoint.
    pub neighbour: NodeId,
    /// Stable storage key.
    pub edge_id: EdgeId,
    /// Direction relative to `source`.
    pub direction: Direction,
    /// Opaque property payload; interpreted by the external property store.
    pub properties: Option<Vec<u8>>,
    /// Transaction that created this edge, `NO_TX` when unknown.
    pub creating_tx: i64,
    /// Transaction that logically deleted this edge, `NO_TX` while live.
    pub deleting_tx: i64,
}

impl Edge {
    /// A fresh bidirectional edge with no properties.
    pub fn new(source: NodeId, neighbour: NodeId, edge_id: EdgeId) -> Self {
        Self::with_direction(source, neighbour, edge_id, Direction::Bidirectional)
    }

    /// A fresh edge with an explicit direction.
    pub fn with_direction(
        source: NodeId,
        neighbour: NodeId,
        edge_id: EdgeId,
        direction: Direction,
    ) -> Self {
        Self {
            source,
            neighbour,
            edge_id,
            direction,
            properties: None,
            creating_tx: NO_TX,
            deleting_tx: NO_TX,
        }
    }

    /// Wire form: `[len:1][neighbour:8][source:8][edge id:8][direction:1]`,
    /// big-endian. Transaction bookkeeping never reaches the storage layer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EDGE_WIRE_LEN);
        buf.push(EDGE_WIRE_LEN as u8);
        buf.extend_from_slice(&self.neighbour.to_be_bytes());
        buf.extend_from_slice(&self.source.to_be_bytes());
        buf.extend_from_slice(&self.edge_id.to_be_bytes());
        buf.push(self.direction.to_byte());
        buf
    }

    /// Decodes the wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EDGE_WIRE_LEN {
            return Err(StoreError::Corruption("edge payload truncated".into()));
        }
        let neighbour = u64::from_be_bytes(bytes[1..9].try_into().expect("8-byte slice"));
        let source = u64::from_be_bytes(bytes[9..17].try_into().expect("8-byte slice"));
        let edge_id = u64::from_be_bytes(bytes[17..25].try_into().expect("8-byte slice"));
        let direction = Direction::from_byte(bytes[25])?;
        Ok(Self {
            source,
            neighbour,
            edge_id,
            direction,
            properties: None,
            creating_tx: NO_TX,
            deleting_tx: NO_TX,
        })
    }
}
