//! Embedded graph storage engine built on skip-list adjacency chains.
//!
//! The engine persists graph topology in a handful of flat files: an
//! 11-byte bit-packed record per relationship, 57-byte skip blocks
//! forming one adjacency chain per node, per-node tail pointers, and a
//! megablock offset table keeping the packed block references narrow.
//! Durability comes from a write-ahead log over a single-file ring
//! buffer; the same ring file in stack discipline persists the id
//! generators. All mutation is transactional: updates buffer in a
//! per-transaction cache, commit replays them through the log and into
//! the store, and reopening after a crash replays whatever tail the
//! log still holds.
//!
//! ```no_run
//! use levelgraph::{Config, Direction, GraphStore};
//!
//! # fn main() -> levelgraph::Result<()> {
//! let mut db = GraphStore::open("./graph", Config::default())?;
//! let mut tx = db.begin_transaction();
//! let a = tx.create_node()?;
//! let b = tx.create_node()?;
//! tx.create_edge(a, b, Direction::Outgoing)?;
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod model;
pub mod primitives;
pub mod storage;
pub mod wal;

pub use db::{Config, GraphStore, Transaction, TxState};
pub use error::{Result, StoreError};
pub use model::{Direction, Edge, EdgeId, Node, NodeId, TxId};
