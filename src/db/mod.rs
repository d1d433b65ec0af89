//! The graph storage engine.
//!
//! [`GraphStore`] ties the subsystems together: the skip-list
//! relationship store, the write-ahead log, the id generators, and the
//! transaction dependency manager. All mutation flows through
//! [`Transaction`]s; opening a store replays whatever the log still
//! holds before accepting new work.
//!
//! Node metadata and property values live in external collaborators
//! (a key-value store and a property index) that sit outside this
//! crate; their log entries are carried for replay ordering but apply
//! as no-ops here.

pub mod config;
pub mod deps;
pub mod transaction;
pub mod update_cache;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::model::{NodeId, TxId};
use crate::storage::idgen::IdGenerator;
use crate::storage::skiplist::{RelationshipRecord, SkipListStore};
use crate::wal::{WalEntry, WriteAheadLog};

pub use config::Config;
pub use deps::{DependencyGraph, DependencyManager};
pub use transaction::{Transaction, TxState};
pub use update_cache::{
    PendingUpdate, TransactionUpdateCache, UpdateKind, UpdatePayload, UpdateTarget,
};

const RELATIONSHIP_BASE: &str = "graph.rels";
const WAL_FILE: &str = "graph.wal";
const NODE_ID_FILE: &str = "graph.nodeids";
const EDGE_ID_FILE: &str = "graph.edgeids";

/// An embedded graph storage engine rooted in one directory.
#[derive(Debug)]
pub struct GraphStore {
    dir: PathBuf,
    pub(crate) store: SkipListStore,
    pub(crate) wal: WriteAheadLog,
    pub(crate) node_ids: IdGenerator,
    pub(crate) edge_ids: IdGenerator,
    pub(crate) deps: DependencyManager,
    next_tx: TxId,
}

impl GraphStore {
    /// Opens (or creates) the store under `dir` and replays any log
    /// tail a previous process left behind.
    pub fn open(dir: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let sync = config.sync_writes;
        let zero = config.zero_on_release;
        let store = SkipListStore::open(dir.join(RELATIONSHIP_BASE), true, sync)?;
        let wal = WriteAheadLog::open(dir.join(WAL_FILE), config.wal_capacity, sync, zero)?;
        let node_ids = IdGenerator::open(dir.join(NODE_ID_FILE), config.id_block_size, sync, zero)?;
        let edge_ids = IdGenerator::open(dir.join(EDGE_ID_FILE), config.id_block_size, sync, zero)?;

        let mut db = Self {
            dir,
            store,
            wal,
            node_ids,
            edge_ids,
            deps: DependencyManager::new(),
            next_tx: 1,
        };
        let replayed = db.recover()?;
        info!(
            dir = %db.dir.display(),
            replayed,
            "graph store opened"
        );
        Ok(db)
    }

    /// Starts a transaction. Only one can be live at a time; the borrow
    /// ends when it commits or rolls back.
    pub fn begin_transaction(&mut self) -> Transaction<'_> {
        let id = self.next_tx;
        self.next_tx += 1;
        Transaction::begin(self, id)
    }

    /// True when `id` was ever minted by the node id generator.
    pub fn node_exists(&self, id: NodeId) -> bool {
        id >= 1 && id < self.node_ids.high_water()
    }

    /// Records a waits-for dependency between two transactions; a
    /// returned id is the deadlock victim the caller must abort.
    pub fn add_dependency(&mut self, from: TxId, to: TxId) -> Option<TxId> {
        self.deps.add_dependency(from, to)
    }

    /// Replays the pending log tail into the store and returns how many
    /// entries were applied. Safe to run over a log whose head was
    /// already applied before a crash.
    pub fn recover(&mut self) -> Result<usize> {
        let mut replayed = 0usize;
        while let Some(entry) = self.wal.dequeue_next()? {
            self.apply(&entry)?;
            replayed += 1;
        }
        if replayed > 0 {
            self.store.sync()?;
            self.wal.clear()?;
            info!(replayed, "log tail replayed");
        }
        Ok(replayed)
    }

    /// Root directory of this store.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Applies one log entry to the store. Idempotent: an entry whose
    /// effect is already present is skipped, so replaying a partially
    /// applied log converges instead of corrupting chains.
    pub(crate) fn apply(&mut self, entry: &WalEntry) -> Result<()> {
        match entry {
            WalEntry::EdgeCreate(edge) => {
                if self.store.is_in_use(edge.edge_id)? {
                    debug!(edge_id = edge.edge_id, "edge already materialised, skipped");
                    return Ok(());
                }
                self.store.update_record(&RelationshipRecord::created(
                    edge.edge_id,
                    edge.source,
                    edge.neighbour,
                ))
            }
            WalEntry::EdgeDelete(id) => match self.store.get_record(*id)? {
                Some(mut rec) => {
                    rec.in_use = false;
                    rec.created = false;
                    self.store.update_record(&rec)
                }
                None => {
                    debug!(edge_id = id, "edge already gone, delete skipped");
                    Ok(())
                }
            },
            // Node bodies and property values are owned by external
            // collaborators; their entries apply as no-ops here.
            WalEntry::NodeCreate(_)
            | WalEntry::NodeDelete(_)
            | WalEntry::NodePropertyCreate { .. }
            | WalEntry::NodePropertyDelete { .. }
            | WalEntry::NodePropertyUpdate { .. }
            | WalEntry::EdgePropertyCreate { .. }
            | WalEntry::EdgePropertyDelete { .. }
            | WalEntry::EdgePropertyUpdate { .. } => Ok(()),
        }
    }
}
