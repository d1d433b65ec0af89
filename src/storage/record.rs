//! Bit-packed relationship record codec.
//!
//! Each relationship occupies one fixed 11-byte record addressed by its
//! edge id. The record does not repeat the endpoints or the edge id; those
//! are recoverable from the skip blocks the record points into. What it
//! stores is the position of the relationship inside each endpoint's
//! skip-list chain: a 20-bit block reference (an offset within the
//! endpoint's current megablock) and a 2-bit slot index per endpoint, plus
//! a 40-bit pointer to the head of the property chain.

use crate::error::{Result, StoreError};

/// Encoded size of one relationship record.
pub const RECORD_SIZE: usize = 11;

/// Widest block reference a record can carry.
pub const MAX_BLOCK_REF: u32 = (1 << 20) - 1;

/// Widest property pointer a record can carry.
pub const MAX_PROP_REF: u64 = (1 << 40) - 1;

const FLAG_IN_USE: u8 = 0b0000_0001;
const FLAG_FIRST_IN_FIRST_CHAIN: u8 = 0b0000_0010;
const FLAG_FIRST_IN_SECOND_CHAIN: u8 = 0b0000_0100;
const SECOND_SLOT_SHIFT: u32 = 4;
const FIRST_SLOT_SHIFT: u32 = 6;
const SLOT_MASK: u8 = 0b0000_0011;

/// In-memory form of one 11-byte relationship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedRecord {
    /// Record describes a live relationship.
    pub in_use: bool,
    /// This relationship opened the first endpoint's chain.
    pub first_in_first_chain: bool,
    /// This relationship opened the second endpoint's chain.
    pub first_in_second_chain: bool,
    /// Skip-block offset within the first endpoint's megablock.
    pub first_ref: u32,
    /// Slot index inside that block, `0..=3`.
    pub first_slot: u8,
    /// Skip-block offset within the second endpoint's megablock.
    pub second_ref: u32,
    /// Slot index inside that block, `0..=3`.
    pub second_slot: u8,
    /// Head of the property chain, if any.
    pub next_prop: Option<u64>,
}

impl PackedRecord {
    /// Encodes into the 11-byte on-disk form.
    ///
    /// Layout: `[flags:1][first ref low:2 LE][second ref low:2 LE]`
    /// `[ref highs:1][next prop:5 LE]`. Byte 5 carries the top four bits
    /// of each block reference, first ref in the low nibble.
    pub fn pack(&self) -> Result<[u8; RECORD_SIZE]> {
        if self.first_ref > MAX_BLOCK_REF || self.second_ref > MAX_BLOCK_REF {
            return Err(StoreError::InvalidArgument(format!(
                "block reference out of 20-bit range: {} / {}",
                self.first_ref, self.second_ref
            )));
        }
        if self.first_slot > 3 || self.second_slot > 3 {
            return Err(StoreError::InvalidArgument(format!(
                "slot index out of range: {} / {}",
                self.first_slot, self.second_slot
            )));
        }
        let prop = match self.next_prop {
            Some(p) if p > MAX_PROP_REF => {
                return Err(StoreError::InvalidArgument(format!(
                    "property pointer out of 40-bit range: {p}"
                )));
            }
            Some(p) => p,
            None => MAX_PROP_REF,
        };

        let mut flags = 0u8;
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if self.first_in_first_chain {
            flags |= FLAG_FIRST_IN_FIRST_CHAIN;
        }
        if self.first_in_second_chain {
            flags |= FLAG_FIRST_IN_SECOND_CHAIN;
        }
        flags |= (self.first_slot & SLOT_MASK) << FIRST_SLOT_SHIFT;
        flags |= (self.second_slot & SLOT_MASK) << SECOND_SLOT_SHIFT;

        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = flags;
        buf[1..3].copy_from_slice(&(self.first_ref as u16).to_le_bytes());
        buf[3..5].copy_from_slice(&(self.second_ref as u16).to_le_bytes());
        buf[5] = ((self.first_ref >> 16) as u8 & 0x0F) | (((self.second_ref >> 16) as u8) << 4);
        buf[6..11].copy_from_slice(&prop.to_le_bytes()[..5]);
        Ok(buf)
    }

    /// Decodes the 11-byte on-disk form. An all-zero record decodes as a
    /// default record with `in_use` clear, so reads past the written
    /// frontier are indistinguishable from never-used slots.
    pub fn unpack(bytes: &[u8; RECORD_SIZE]) -> Self {
        let flags = bytes[0];
        let first_low = u16::from_le_bytes([bytes[1], bytes[2]]) as u32;
        let second_low = u16::from_le_bytes([bytes[3], bytes[4]]) as u32;
        let first_ref = first_low | (((bytes[5] & 0x0F) as u32) << 16);
        let second_ref = second_low | (((bytes[5] >> 4) as u32) << 16);

        let mut prop_bytes = [0u8; 8];
        prop_bytes[..5].copy_from_slice(&bytes[6..11]);
        let prop = u64::from_le_bytes(prop_bytes);

        Self {
            in_use: flags & FLAG_IN_USE != 0,
            first_in_first_chain: flags & FLAG_FIRST_IN_FIRST_CHAIN != 0,
            first_in_second_chain: flags & FLAG_FIRST_IN_SECOND_CHAIN != 0,
            first_ref,
            first_slot: (flags >> FIRST_SLOT_SHIFT) & SLOT_MASK,
            second_ref,
            second_slot: (flags >> SECOND_SLOT_SHIFT) & SLOT_MASK,
            next_prop: if prop == MAX_PROP_REF { None } else { Some(prop) },
        }
    }
}
