//! Block id generator.
//!
//! Hands out disjoint `[low, high)` id ranges backed by a durable ring
//! file in stack discipline. The bottom (oldest) element always holds the
//! current high-water id and is rewritten in place whenever fresh ids are
//! minted; ranges handed back by finished transactions sit above it as
//! `low`/`high` pairs and are reissued LIFO before the high-water mark
//! advances again.

use std::convert::TryInto;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::primitives::ring::{RingFile, RingFileBuilder};

/// Default number of ids per issued range.
pub const DEFAULT_BLOCK_SIZE: u64 = 1000;

/// Id 0 is never issued; the first fresh range starts here.
const FIRST_ID: u64 = 1;

/// Durable allocator of disjoint id ranges.
#[derive(Debug)]
pub struct IdGenerator {
    ring: RingFile,
    /// First id never issued by a fresh range.
    max_id: u64,
    block_size: u64,
}

impl IdGenerator {
    /// Opens (or creates) a generator backed by the given ring file.
    /// `zero` controls whether released ring regions are wiped.
    ///
    /// A well-formed file holds the high-water slot plus whole pairs,
    /// so an odd element count. An even count means a crash landed
    /// between the two pops of a pooled range; the stranded low bound
    /// on top is discarded so the pool stays pair-aligned and the
    /// high-water slot stays out of reach.
    pub fn open(path: impl Into<PathBuf>, block_size: u64, sync: bool, zero: bool) -> Result<Self> {
        debug_assert!(block_size > 0);
        let mut ring = RingFileBuilder::new(path).sync(sync).zero(zero).open()?;
        if ring.is_empty() {
            ring.push(&FIRST_ID.to_be_bytes())?;
        }
        if ring.len() % 2 == 0 {
            ring.pop_back()?;
            debug!("discarded range bound stranded by an interrupted pop");
        }
        let bottom = ring
            .peek_front()?
            .ok_or(StoreError::NotFound("id generator high-water slot"))?;
        let max_id = decode_id(&bottom)?;
        Ok(Self {
            ring,
            max_id,
            block_size,
        })
    }

    /// The lowest id no fresh range has been minted over yet.
    pub fn high_water(&self) -> u64 {
        self.max_id
    }

    /// Issues a `[low, high)` range, reusing the most recently returned
    /// range when one is available.
    pub fn get_id_range(&mut self) -> Result<(u64, u64)> {
        // A whole pair must sit above the high-water slot; at 2 the top
        // element is a stranded bound and popping on would reach the
        // slot itself.
        if self.ring.len() >= 3 {
            let high = decode_id(
                &self
                    .ring
                    .pop_back()?
                    .ok_or(StoreError::NotFound("returned range high bound"))?,
            )?;
            let low = decode_id(
                &self
                    .ring
                    .pop_back()?
                    .ok_or(StoreError::NotFound("returned range low bound"))?,
            )?;
            debug!(low, high, "reissuing returned id range");
            return Ok((low, high));
        }
        let low = self.max_id;
        let high = low + self.block_size;
        self.ring.rewrite_front(&high.to_be_bytes())?;
        self.max_id = high;
        Ok((low, high))
    }

    /// Hands back the unused portion of an issued range for LIFO reuse.
    pub fn return_id_range(&mut self, low: u64, high: u64) -> Result<()> {
        if low >= high {
            return Ok(());
        }
        self.ring.push(&low.to_be_bytes())?;
        self.ring.push(&high.to_be_bytes())?;
        Ok(())
    }
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corruption("id generator element is not 8 bytes".into()))?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_ranges_are_disjoint_and_increasing() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let mut gen = IdGenerator::open(dir.path().join("ids"), 100, false, true)?;
        let (a_lo, a_hi) = gen.get_id_range()?;
        let (b_lo, b_hi) = gen.get_id_range()?;
        assert_eq!((a_lo, a_hi), (1, 101));
        assert_eq!((b_lo, b_hi), (101, 201));
        assert!(a_hi <= b_lo);
        Ok(())
    }

    #[test]
    fn returned_ranges_are_reused_lifo() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let mut gen = IdGenerator::open(dir.path().join("ids"), 100, false, true)?;
        let first = gen.get_id_range()?;
        let second = gen.get_id_range()?;
        gen.return_id_range(first.0 + 10, first.1)?;
        gen.return_id_range(second.0 + 5, second.1)?;

        assert_eq!(gen.get_id_range()?, (second.0 + 5, second.1));
        assert_eq!(gen.get_id_range()?, (first.0 + 10, first.1));
        // Pool exhausted, high-water advances again.
        assert_eq!(gen.get_id_range()?, (201, 301));
        Ok(())
    }

    #[test]
    fn high_water_survives_reopen() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("ids");
        {
            let mut gen = IdGenerator::open(&path, 50, true, true)?;
            gen.get_id_range()?;
            gen.get_id_range()?;
        }
        let mut gen = IdGenerator::open(&path, 50, true, true)?;
        assert_eq!(gen.high_water(), 101);
        assert_eq!(gen.get_id_range()?, (101, 151));
        Ok(())
    }

    #[test]
    fn stranded_pop_never_reaches_the_high_water_slot() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("ids");
        // A crash between the high and low pops of a pooled range
        // leaves an even element count: the high-water slot plus the
        // stranded low bound.
        {
            let mut ring = RingFileBuilder::new(&path).open()?;
            ring.push(&1001u64.to_be_bytes())?;
            ring.push(&500u64.to_be_bytes())?;
        }

        let mut gen = IdGenerator::open(&path, 100, true, true)?;
        assert_eq!(gen.high_water(), 1001);
        assert_eq!(gen.get_id_range()?, (1001, 1101));
        assert_eq!(gen.get_id_range()?, (1101, 1201));
        Ok(())
    }

    #[test]
    fn empty_remainder_is_not_pooled() -> Result<()> {
        let dir = tempdir().expect("tmpdir");
        let mut gen = IdGenerator::open(dir.path().join("ids"), 10, false, true)?;
        let (_, high) = gen.get_id_range()?;
        gen.return_id_range(high, high)?;
        assert_eq!(gen.get_id_range()?, (11, 21));
        Ok(())
    }
}
