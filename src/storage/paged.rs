//! Fixed-width record files.
//!
//! A [`RecordFile`] is a flat array of equal-sized records addressed by
//! record id. There is no header; the record count is the file length
//! divided by the record size, so the file length is kept an exact
//! multiple of it at all times. Writes past the current frontier
//! zero-extend the gap. Each file declares a page size that is a multiple
//! of its record size, used as the write granularity for bulk fills so a
//! fill never splits a record across two writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// A flat file of fixed-size records.
#[derive(Debug)]
pub struct RecordFile {
    file: File,
    path: PathBuf,
    record_size: u64,
    page_size: u64,
    /// Records currently spanned by the file.
    records: u64,
    sync: bool,
}

impl RecordFile {
    /// Opens (or creates) a record file.
    ///
    /// An existing file whose length is not a multiple of the record size
    /// is rejected as corrupt. A missing file without `create_if_missing`
    /// is `NotFound`.
    pub fn open(
        path: impl Into<PathBuf>,
        record_size: u64,
        page_size: u64,
        create_if_missing: bool,
        sync: bool,
    ) -> Result<Self> {
        debug_assert!(record_size > 0 && page_size % record_size == 0);
        let path = path.into();
        let exists = path.exists();
        if !exists && !create_if_missing {
            return Err(StoreError::NotFound("record file"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .open(&path)?;
        let len = file.metadata()?.len();
        if len % record_size != 0 {
            return Err(StoreError::Corruption(format!(
                "record file {} length {len} is not a multiple of the record size {record_size}",
                path.display()
            )));
        }
        Ok(Self {
            file,
            path,
            record_size,
            page_size,
            records: len / record_size,
            sync,
        })
    }

    /// The file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records the file currently spans.
    pub fn num_records(&self) -> u64 {
        self.records
    }

    /// Reads record `id` into `buf`.
    ///
    /// Returns `false` (with `buf` zeroed) when `id` is past the written
    /// frontier, so never-written records read as all-zero.
    pub fn read_record(&self, id: u64, buf: &mut [u8]) -> Result<bool> {
        debug_assert_eq!(buf.len() as u64, self.record_size);
        if id >= self.records {
            buf.fill(0);
            return Ok(false);
        }
        let mut reader = &self.file;
        reader.seek(SeekFrom::Start(id * self.record_size))?;
        reader.read_exact(buf)?;
        Ok(true)
    }

    /// Writes record `id`, zero-extending the file up to it if needed.
    pub fn write_record(&mut self, id: u64, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len() as u64, self.record_size);
        if id >= self.records {
            self.file.set_len((id + 1) * self.record_size)?;
            self.records = id + 1;
        }
        let mut writer = &self.file;
        writer.seek(SeekFrom::Start(id * self.record_size))?;
        writer.write_all(buf)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Appends one record at the frontier and returns its id.
    pub fn append_record(&mut self, buf: &[u8]) -> Result<u64> {
        let id = self.records;
        self.write_record(id, buf)?;
        Ok(id)
    }

    /// Overwrites `count` records starting at `from` with `byte`,
    /// extending the file as needed. Writes are issued a page at a time.
    pub fn fill_records(&mut self, from: u64, count: u64, byte: u8) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let last = from + count - 1;
        if last >= self.records {
            self.file.set_len((last + 1) * self.record_size)?;
            self.records = last + 1;
        }
        let page = vec![byte; self.page_size as usize];
        let mut remaining = count * self.record_size;
        let mut writer = &self.file;
        writer.seek(SeekFrom::Start(from * self.record_size))?;
        while remaining > 0 {
            let chunk = remaining.min(self.page_size) as usize;
            writer.write_all(&page[..chunk])?;
            remaining -= chunk as u64;
        }
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Forces buffered data to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
