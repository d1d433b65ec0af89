//! Skip-list relationship store.
//!
//! Adjacency is kept as one doubly-linked chain of [`SkipBlock`]s per
//! node, newest block reachable through a per-node tail pointer. Each
//! relationship additionally gets one bit-packed [`PackedRecord`] that
//! remembers exactly where it sits in both endpoints' chains, so a
//! record lookup can recover its chain neighbours without scanning.
//!
//! Block references inside a record are only 20 bits wide. To keep them
//! in range the relationship id space is carved into megablocks of 2^20
//! ids, and the first record of each megablock checkpoints the block
//! allocation cursor into an append-only offset table; records store
//! their block ids relative to their megablock's checkpoint.
//!
//! Four files back one store:
//!
//! | file            | record | content                               |
//! |-----------------|--------|---------------------------------------|
//! | `<base>`        | 11     | bit-packed relationship records       |
//! | `<base>.meta`   | 57     | skip blocks                           |
//! | `<base>.nodep`  | 8      | per-node tail-block pointers          |
//! | `<base>.offset` | 8      | megablock base checkpoints            |

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::storage::block::{SkipBlock, BLOCK_SIZE};
use crate::storage::paged::RecordFile;
use crate::storage::record::{PackedRecord, MAX_BLOCK_REF, RECORD_SIZE};

/// Relationship ids per megablock.
const MEGABLOCK_BITS: u32 = 20;

/// Tail-pointer sentinel for nodes with no relationships yet.
const NO_TAIL: u64 = u64::MAX;

const RECORD_PAGE: u64 = 4092;
const BLOCK_PAGE: u64 = 4047;
const POINTER_PAGE: u64 = 4096;

/// One relationship as the store sees it.
///
/// `created` distinguishes first materialisation (which allocates chain
/// slots at both endpoints) from in-place updates of an existing record
/// (which only touch the liveness flag and the property pointer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Stable relationship id; addresses the packed record.
    pub rel_id: u64,
    /// First endpoint.
    pub first_node: u64,
    /// Second endpoint.
    pub second_node: u64,
    /// Record describes a live relationship.
    pub in_use: bool,
    /// This call materialises the relationship for the first time.
    pub created: bool,
    /// Head of the property chain, if any.
    pub next_prop: Option<u64>,
    /// Chain predecessor at the first endpoint (filled on read).
    pub first_prev_rel: Option<u64>,
    /// Chain successor at the first endpoint (filled on read).
    pub first_next_rel: Option<u64>,
    /// Chain predecessor at the second endpoint (filled on read).
    pub second_prev_rel: Option<u64>,
    /// Chain successor at the second endpoint (filled on read).
    pub second_next_rel: Option<u64>,
}

impl RelationshipRecord {
    /// A record about to be materialised for the first time.
    pub fn created(rel_id: u64, first_node: u64, second_node: u64) -> Self {
        Self {
            rel_id,
            first_node,
            second_node,
            in_use: true,
            created: true,
            next_prop: None,
            first_prev_rel: None,
            first_next_rel: None,
            second_prev_rel: None,
            second_next_rel: None,
        }
    }
}

/// Cached position of a node's newest block.
#[derive(Debug, Clone, Copy)]
struct TailSlot {
    block: u64,
    count: u8,
}

/// The relationship store over its four backing files.
#[derive(Debug)]
pub struct SkipListStore {
    records: RecordFile,
    blocks: RecordFile,
    tails: RecordFile,
    offsets_file: RecordFile,
    /// In-memory copy of the megablock checkpoint table.
    offsets: Vec<u64>,
    /// Newest block per node, for nodes touched since open.
    tail_cache: Mutex<FxHashMap<u64, TailSlot>>,
    /// Block allocation cursor, derived from the block file length.
    next_block: u64,
}

impl SkipListStore {
    /// Opens (or creates) the store rooted at `base`.
    pub fn open(base: impl Into<PathBuf>, create_if_missing: bool, sync: bool) -> Result<Self> {
        let base = base.into();
        let records = RecordFile::open(
            &base,
            RECORD_SIZE as u64,
            RECORD_PAGE,
            create_if_missing,
            sync,
        )?;
        let blocks = RecordFile::open(
            sibling(&base, "meta"),
            BLOCK_SIZE as u64,
            BLOCK_PAGE,
            create_if_missing,
            sync,
        )?;
        let tails = RecordFile::open(
            sibling(&base, "nodep"),
            8,
            POINTER_PAGE,
            create_if_missing,
            sync,
        )?;
        let offsets_file = RecordFile::open(
            sibling(&base, "offset"),
            8,
            POINTER_PAGE,
            create_if_missing,
            sync,
        )?;

        let mut offsets = Vec::with_capacity(offsets_file.num_records() as usize);
        let mut buf = [0u8; 8];
        for id in 0..offsets_file.num_records() {
            offsets_file.read_record(id, &mut buf)?;
            offsets.push(u64::from_be_bytes(buf));
        }
        if records.num_records() > 0 && offsets.is_empty() {
            return Err(StoreError::Corruption(format!(
                "store {} has relationship records but no megablock checkpoints",
                base.display()
            )));
        }

        let next_block = blocks.num_records();
        debug!(
            base = %base.display(),
            records = records.num_records(),
            blocks = next_block,
            megablocks = offsets.len(),
            "relationship store opened"
        );
        Ok(Self {
            records,
            blocks,
            tails,
            offsets_file,
            offsets,
            tail_cache: Mutex::new(FxHashMap::default()),
            next_block,
        })
    }

    /// Writes one relationship record.
    ///
    /// With `created` set this allocates a chain slot at both endpoints
    /// and writes the full packed record. Otherwise only the liveness
    /// flags and the property pointer of the existing record change; the
    /// packed chain position is preserved untouched.
    pub fn update_record(&mut self, rec: &RelationshipRecord) -> Result<()> {
        if rec.created {
            return self.create_record(rec);
        }

        let mut buf = [0u8; RECORD_SIZE];
        if !self.records.read_record(rec.rel_id, &mut buf)? {
            return Err(StoreError::InvalidArgument(format!(
                "update of unmaterialised relationship {}",
                rec.rel_id
            )));
        }
        let mut packed = PackedRecord::unpack(&buf);
        packed.in_use = rec.in_use;
        packed.next_prop = rec.next_prop;
        self.records.write_record(rec.rel_id, &packed.pack()?)
    }

    fn create_record(&mut self, rec: &RelationshipRecord) -> Result<()> {
        let mega = (rec.rel_id >> MEGABLOCK_BITS) as usize;
        while self.offsets.len() <= mega {
            let base = self.next_block;
            self.offsets_file.append_record(&base.to_be_bytes())?;
            self.offsets.push(base);
            debug!(
                megablock = self.offsets.len() - 1,
                base, "megablock checkpoint recorded"
            );
        }
        let base = self.offsets[mega];

        let (first_block, first_slot, first_ever_1) =
            self.append_to_chain(rec.first_node, rec.rel_id, base)?;
        let (second_block, second_slot, first_ever_2) =
            self.append_to_chain(rec.second_node, rec.rel_id, base)?;

        let first_ref = block_ref(first_block, base)?;
        let second_ref = block_ref(second_block, base)?;
        let packed = PackedRecord {
            in_use: rec.in_use,
            first_in_first_chain: first_ever_1,
            first_in_second_chain: first_ever_2,
            first_ref,
            first_slot,
            second_ref,
            second_slot,
            next_prop: rec.next_prop,
        };
        self.records.write_record(rec.rel_id, &packed.pack()?)
    }

    /// Appends `rel_id` to `node`'s chain and returns the block id, the
    /// slot index within it, and whether this opened the node's chain.
    ///
    /// The node's current tail block is reused only when its id sits at
    /// or above the record megablock's checkpoint and the difference fits
    /// the packed 20-bit reference; otherwise (or when the tail is full)
    /// a fresh block is chained after it.
    fn append_to_chain(&mut self, node: u64, rel_id: u64, mega_base: u64) -> Result<(u64, u8, bool)> {
        let cached = self.tail_cache.lock().get(&node).copied();
        let tail = match cached {
            Some(slot) => Some(slot.block),
            None => self.read_tail(node)?,
        };

        let (block_id, slot, count, first_ever) = match tail {
            None => {
                // First relationship of this node. Pad the pointer file
                // with sentinels up through its slot, then open the chain.
                if node >= self.tails.num_records() {
                    let from = self.tails.num_records();
                    self.tails.fill_records(from, node - from + 1, 0xFF)?;
                }
                let block_id = self.allocate_block();
                let mut block = SkipBlock::new(node);
                let slot = block
                    .push_rel(rel_id)
                    .ok_or_else(|| StoreError::Corruption("fresh block is full".into()))?;
                self.blocks.write_record(block_id, &block.encode())?;
                self.tails.write_record(node, &block_id.to_be_bytes())?;
                (block_id, slot, block.count, true)
            }
            Some(tail_id) => {
                let mut tail_block = self.read_block(tail_id)?;
                let reusable =
                    tail_id >= mega_base && tail_id - mega_base <= u64::from(MAX_BLOCK_REF);
                if reusable && !tail_block.is_full() {
                    let slot = tail_block
                        .push_rel(rel_id)
                        .ok_or_else(|| StoreError::Corruption("partial block is full".into()))?;
                    self.blocks.write_record(tail_id, &tail_block.encode())?;
                    (tail_id, slot, tail_block.count, false)
                } else {
                    let block_id = self.allocate_block();
                    let mut block = SkipBlock::new(node);
                    block.prev = Some(tail_id);
                    let slot = block
                        .push_rel(rel_id)
                        .ok_or_else(|| StoreError::Corruption("fresh block is full".into()))?;
                    tail_block.next = Some(block_id);
                    self.blocks.write_record(tail_id, &tail_block.encode())?;
                    self.blocks.write_record(block_id, &block.encode())?;
                    self.tails.write_record(node, &block_id.to_be_bytes())?;
                    (block_id, slot, block.count, false)
                }
            }
        };

        self.tail_cache.lock().insert(
            node,
            TailSlot {
                block: block_id,
                count,
            },
        );
        Ok((block_id, slot, first_ever))
    }

    /// Reads one relationship record and resolves its chain neighbours.
    ///
    /// Records that were never written, or whose in-use flag is clear,
    /// read as `None`.
    pub fn get_record(&self, rel_id: u64) -> Result<Option<RelationshipRecord>> {
        let mut buf = [0u8; RECORD_SIZE];
        if !self.records.read_record(rel_id, &mut buf)? {
            return Ok(None);
        }
        let packed = PackedRecord::unpack(&buf);
        if !packed.in_use {
            return Ok(None);
        }

        let mega = (rel_id >> MEGABLOCK_BITS) as usize;
        let base = *self.offsets.get(mega).ok_or_else(|| {
            StoreError::Corruption(format!(
                "relationship {rel_id} references unknown megablock {mega}"
            ))
        })?;

        let first = self.resolve_endpoint(
            base + u64::from(packed.first_ref),
            packed.first_slot,
            packed.first_in_first_chain,
        )?;
        let second = self.resolve_endpoint(
            base + u64::from(packed.second_ref),
            packed.second_slot,
            packed.first_in_second_chain,
        )?;

        Ok(Some(RelationshipRecord {
            rel_id,
            first_node: first.node,
            second_node: second.node,
            in_use: true,
            created: false,
            next_prop: packed.next_prop,
            first_prev_rel: first.prev_rel,
            first_next_rel: first.next_rel,
            second_prev_rel: second.prev_rel,
            second_next_rel: second.next_rel,
        }))
    }

    /// True when `rel_id` addresses a live record.
    pub fn is_in_use(&self, rel_id: u64) -> Result<bool> {
        let mut buf = [0u8; RECORD_SIZE];
        if !self.records.read_record(rel_id, &mut buf)? {
            return Ok(false);
        }
        Ok(PackedRecord::unpack(&buf).in_use)
    }

    /// All relationship ids of `node`, oldest first (creation order).
    pub fn node_relationships(&self, node: u64) -> Result<Vec<u64>> {
        let tail = {
            let cached = self.tail_cache.lock().get(&node).copied();
            match cached {
                Some(slot) => Some(slot.block),
                None => self.read_tail(node)?,
            }
        };
        let Some(tail) = tail else {
            return Ok(Vec::new());
        };

        let mut chain: SmallVec<[u64; 8]> = SmallVec::new();
        let mut cursor = Some(tail);
        while let Some(block_id) = cursor {
            chain.push(block_id);
            cursor = self.read_block(block_id)?.prev;
        }

        let mut rels = Vec::with_capacity(chain.len() * 4);
        for block_id in chain.iter().rev() {
            let block = self.read_block(*block_id)?;
            rels.extend_from_slice(&block.rels[..block.count as usize]);
        }
        Ok(rels)
    }

    /// Forces all four files to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.records.sync()?;
        self.blocks.sync()?;
        self.tails.sync()?;
        self.offsets_file.sync()
    }

    /// Syncs and consumes the store.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    fn allocate_block(&mut self) -> u64 {
        let id = self.next_block;
        self.next_block += 1;
        id
    }

    fn read_tail(&self, node: u64) -> Result<Option<u64>> {
        let mut buf = [0u8; 8];
        if !self.tails.read_record(node, &mut buf)? {
            return Ok(None);
        }
        let ptr = u64::from_be_bytes(buf);
        Ok((ptr != NO_TAIL).then_some(ptr))
    }

    fn read_block(&self, block_id: u64) -> Result<SkipBlock> {
        let mut buf = [0u8; BLOCK_SIZE];
        if !self.blocks.read_record(block_id, &mut buf)? {
            return Err(StoreError::Corruption(format!(
                "skip block {block_id} is past the allocated frontier"
            )));
        }
        Ok(SkipBlock::decode(&buf))
    }

    fn resolve_endpoint(&self, block_id: u64, slot: u8, first_in_chain: bool) -> Result<EndpointView> {
        let block = self.read_block(block_id)?;
        if slot >= block.count {
            return Err(StoreError::Corruption(format!(
                "slot {slot} past occupancy {} in skip block {block_id}",
                block.count
            )));
        }

        let prev_rel = if slot > 0 {
            Some(block.rels[slot as usize - 1])
        } else if first_in_chain {
            None
        } else {
            let prev_id = block.prev.ok_or_else(|| {
                StoreError::Corruption(format!("skip block {block_id} lost its predecessor"))
            })?;
            let prev = self.read_block(prev_id)?;
            Some(prev.rels[prev.count as usize - 1])
        };

        let next_rel = if slot + 1 < block.count {
            Some(block.rels[slot as usize + 1])
        } else {
            match block.next {
                Some(next_id) => Some(self.read_block(next_id)?.rels[0]),
                None => None,
            }
        };

        Ok(EndpointView {
            node: block.node_id,
            prev_rel,
            next_rel,
        })
    }
}

/// A record's position as seen from one endpoint's chain.
struct EndpointView {
    node: u64,
    prev_rel: Option<u64>,
    next_rel: Option<u64>,
}

fn block_ref(block_id: u64, mega_base: u64) -> Result<u32> {
    let diff = block_id.checked_sub(mega_base).ok_or_else(|| {
        StoreError::Corruption(format!(
            "block {block_id} precedes its megablock base {mega_base}"
        ))
    })?;
    if diff > u64::from(MAX_BLOCK_REF) {
        return Err(StoreError::Corruption(format!(
            "block {block_id} is out of 20-bit reach of megablock base {mega_base}"
        )));
    }
    Ok(diff as u32)
}

fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
