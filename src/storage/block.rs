//! Skip-block codec.
//!
//! A skip block is one link in a node's relationship chain: up to four
//! relationship ids plus forward and backward pointers to the neighbouring
//! blocks of the same node. Blocks are fixed at 57 bytes and addressed by
//! block id in the skip file.

use std::convert::TryInto;

/// Encoded size of one skip block.
pub const BLOCK_SIZE: usize = 57;

/// Relationship slots per block.
pub const SLOTS_PER_BLOCK: usize = 4;

const NO_BLOCK: u64 = u64::MAX;
const EMPTY_SLOT: u64 = u64::MAX;

/// In-memory form of one 57-byte skip block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipBlock {
    /// Node this block belongs to.
    pub node_id: u64,
    /// Number of occupied relationship slots, `0..=4`.
    pub count: u8,
    /// Previous (older) block of the same node.
    pub prev: Option<u64>,
    /// Next (newer) block of the same node.
    pub next: Option<u64>,
    /// Relationship ids, oldest slot first. Unused slots hold `u64::MAX`.
    pub rels: [u64; SLOTS_PER_BLOCK],
}

impl SkipBlock {
    /// A fresh empty block for `node_id`, linked to nothing.
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id,
            count: 0,
            prev: None,
            next: None,
            rels: [EMPTY_SLOT; SLOTS_PER_BLOCK],
        }
    }

    /// True when every relationship slot is occupied.
    pub fn is_full(&self) -> bool {
        self.count as usize >= SLOTS_PER_BLOCK
    }

    /// Occupies the next free slot and returns its index.
    ///
    /// The caller must check `is_full` first; a full block is left
    /// untouched and `None` is returned.
    pub fn push_rel(&mut self, rel_id: u64) -> Option<u8> {
        if self.is_full() {
            return None;
        }
        let slot = self.count;
        self.rels[slot as usize] = rel_id;
        self.count += 1;
        Some(slot)
    }

    /// Encodes into the 57-byte on-disk form, big-endian:
    /// `[node id:8][count:1][prev:8][next:8][rels:4 x 8]`.
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..8].copy_from_slice(&self.node_id.to_be_bytes());
        buf[8] = self.count;
        buf[9..17].copy_from_slice(&self.prev.unwrap_or(NO_BLOCK).to_be_bytes());
        buf[17..25].copy_from_slice(&self.next.unwrap_or(NO_BLOCK).to_be_bytes());
        for (i, rel) in self.rels.iter().enumerate() {
            let at = 25 + i * 8;
            buf[at..at + 8].copy_from_slice(&rel.to_be_bytes());
        }
        buf
    }

    /// Decodes the 57-byte on-disk form.
    pub fn decode(bytes: &[u8; BLOCK_SIZE]) -> Self {
        let node_id = u64::from_be_bytes(bytes[0..8].try_into().expect("8-byte slice"));
        let count = bytes[8];
        let prev = u64::from_be_bytes(bytes[9..17].try_into().expect("8-byte slice"));
        let next = u64::from_be_bytes(bytes[17..25].try_into().expect("8-byte slice"));
        let mut rels = [EMPTY_SLOT; SLOTS_PER_BLOCK];
        for (i, rel) in rels.iter_mut().enumerate() {
            let at = 25 + i * 8;
            *rel = u64::from_be_bytes(bytes[at..at + 8].try_into().expect("8-byte slice"));
        }
        Self {
            node_id,
            count,
            prev: (prev != NO_BLOCK).then_some(prev),
            next: (next != NO_BLOCK).then_some(next),
            rels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut block = SkipBlock::new(9);
        block.push_rel(100);
        block.push_rel(101);
        block.prev = Some(3);

        let decoded = SkipBlock::decode(&block.encode());
        assert_eq!(decoded, block);
        assert_eq!(decoded.count, 2);
        assert_eq!(decoded.prev, Some(3));
        assert_eq!(decoded.next, None);
        assert_eq!(decoded.rels[0], 100);
        assert_eq!(decoded.rels[1], 101);
        assert_eq!(decoded.rels[2], u64::MAX);
    }

    #[test]
    fn slots_fill_oldest_first() {
        let mut block = SkipBlock::new(1);
        assert_eq!(block.push_rel(10), Some(0));
        assert_eq!(block.push_rel(11), Some(1));
        assert_eq!(block.push_rel(12), Some(2));
        assert_eq!(block.push_rel(13), Some(3));
        assert!(block.is_full());
        assert_eq!(block.push_rel(14), None);
        assert_eq!(block.count, 4);
    }
}
