//! A single-file durable ring buffer of variable-length binary elements.
//!
//! The file carries a small header that is rewritten as a whole on every
//! structural mutation. Header writes are assumed atomic with respect to
//! crashes, and they always follow the corresponding data write, so a torn
//! mutation is invisible after reopen: the old header still describes a
//! consistent buffer. This is the engine's only crash-consistency
//! mechanism for the write-ahead log and the id-generator stack.
//!
//! On-disk format (all integers big-endian):
//!
//! ```text
//! Header (16 bytes):
//!   u32  file length (power of two, >= 4096)
//!   u32  element count
//!   u32  head element offset (oldest; 0 when empty)
//!   u32  tail element offset (newest; 0 when empty)
//! Element:
//!   u32  payload length
//!   ...  payload
//! ```
//!
//! Elements occupy the region past the header and wrap around the end of
//! the file. Pushing appends at the tail; consumption is supported from
//! either end (`pop_front` for queue discipline, `pop_back` for stack
//! discipline). Arbitrary removal is not supported.

use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StoreError};

/// Initial (and minimum) file size in bytes: one file-system block.
pub const INITIAL_LENGTH: u64 = 4096;
/// Size of the atomically rewritten file header.
pub const HEADER_LENGTH: u64 = 16;
/// Size of the per-element length prefix.
const ELEMENT_HEADER_LENGTH: u64 = 4;

const ZEROES: [u8; 4096] = [0u8; 4096];

/// Pointer to one element inside the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Element {
    /// Offset of the element's length prefix.
    pos: u64,
    /// Payload length.
    len: u32,
}

impl Element {
    const NULL: Element = Element { pos: 0, len: 0 };
}

/// Builder for [`RingFile`] instances.
///
/// Only one instance should access a given file at a time; the container
/// performs no cross-process locking.
#[derive(Debug)]
pub struct RingFileBuilder {
    path: PathBuf,
    zero: bool,
    sync: bool,
}

impl RingFileBuilder {
    /// Starts building a ring buffer backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            zero: true,
            sync: true,
        }
    }

    /// When true, released regions are overwritten with zero bytes.
    pub fn zero(mut self, zero: bool) -> Self {
        self.zero = zero;
        self
    }

    /// When false, data syncs are skipped (faster, not crash-safe).
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Opens the file, initializing it if absent or empty.
    pub fn open(self) -> Result<RingFile> {
        RingFile::open_with(self.path, self.zero, self.sync)
    }
}

/// A durable stack/queue over one ring-buffer file.
#[derive(Debug)]
pub struct RingFile {
    file: File,
    path: PathBuf,
    /// Cached file length; always a power of two.
    file_len: u64,
    count: u32,
    head: Element,
    tail: Element,
    zero: bool,
    sync: bool,
    /// Incremented on every structural mutation; snapshot by iterators.
    generation: u64,
}

impl RingFile {
    fn open_with(path: PathBuf, zero: bool, sync: bool) -> Result<Self> {
        let needs_init = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => return Err(err.into()),
        };
        if needs_init {
            initialize_file(&path)?;
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_LENGTH as usize];
        read_exact_at(&file, 0, &mut header)?;
        let stored_len = u64::from(u32::from_be_bytes(header[0..4].try_into().expect("4 bytes")));
        let count = u32::from_be_bytes(header[4..8].try_into().expect("4 bytes"));
        let head_pos = u64::from(u32::from_be_bytes(header[8..12].try_into().expect("4 bytes")));
        let tail_pos = u64::from(u32::from_be_bytes(header[12..16].try_into().expect("4 bytes")));

        let actual_len = file.metadata()?.len();
        if stored_len > actual_len {
            return Err(StoreError::Corruption(format!(
                "ring file {} is truncated: header claims {stored_len} bytes, file has {actual_len}",
                path.display()
            )));
        }
        if stored_len <= HEADER_LENGTH {
            return Err(StoreError::Corruption(format!(
                "ring file {} header length {stored_len} is invalid",
                path.display()
            )));
        }

        let mut ring = Self {
            file,
            path,
            file_len: stored_len,
            count,
            head: Element::NULL,
            tail: Element::NULL,
            zero,
            sync,
            generation: 0,
        };

        if count > 0 {
            ring.head = ring.read_element(head_pos)?;
            ring.tail = ring.read_element(tail_pos)?;
        }
        Ok(ring)
    }

    /// The file backing this ring.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of elements held.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// True when no elements are held.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bytes occupied by the header plus all live elements.
    pub fn used_bytes(&self) -> u64 {
        if self.count == 0 {
            return HEADER_LENGTH;
        }
        // The raw (unwrapped) end position also accounts for a tail
        // element whose payload wraps past the physical end of file.
        let tail_end = self.tail.pos + ELEMENT_HEADER_LENGTH + u64::from(self.tail.len);
        if self.tail.pos >= self.head.pos {
            tail_end - self.head.pos + HEADER_LENGTH
        } else {
            tail_end + self.file_len - self.head.pos
        }
    }

    fn remaining_bytes(&self) -> u64 {
        self.file_len - self.used_bytes()
    }

    /// Appends an element at the newest end.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| {
            StoreError::InvalidArgument("ring element exceeds u32 length".into())
        })?;
        self.expand_if_necessary(ELEMENT_HEADER_LENGTH + u64::from(len))?;

        let was_empty = self.count == 0;
        let pos = if was_empty {
            HEADER_LENGTH
        } else {
            self.advance(self.tail)
        };

        let mut frame = Vec::with_capacity(data.len() + ELEMENT_HEADER_LENGTH as usize);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(data);
        self.ring_write(pos, &frame)?;
        self.sync_data()?;

        let head_pos = if was_empty { pos } else { self.head.pos };
        self.write_header(self.file_len, self.count + 1, head_pos, pos)?;

        self.tail = Element { pos, len };
        if was_empty {
            self.head = self.tail;
        }
        self.count += 1;
        self.generation += 1;
        Ok(())
    }

    /// Reads the newest element without removing it.
    pub fn peek_back(&self) -> Result<Option<Vec<u8>>> {
        if self.count == 0 {
            return Ok(None);
        }
        self.read_payload(self.tail).map(Some)
    }

    /// Reads the oldest element without removing it.
    pub fn peek_front(&self) -> Result<Option<Vec<u8>>> {
        if self.count == 0 {
            return Ok(None);
        }
        self.read_payload(self.head).map(Some)
    }

    /// Removes and returns the oldest element.
    pub fn pop_front(&mut self) -> Result<Option<Vec<u8>>> {
        if self.count == 0 {
            return Ok(None);
        }
        let data = self.read_payload(self.head)?;
        if self.count == 1 {
            self.clear()?;
            return Ok(Some(data));
        }

        let released = self.head;
        let next_pos = self.advance(self.head);
        let next = self.read_element(next_pos)?;
        self.write_header(self.file_len, self.count - 1, next_pos, self.tail.pos)?;
        self.head = next;
        self.count -= 1;
        self.generation += 1;
        if self.zero {
            self.ring_erase(
                released.pos,
                ELEMENT_HEADER_LENGTH + u64::from(released.len),
            )?;
        }
        Ok(Some(data))
    }

    /// Removes and returns the newest element.
    ///
    /// Locating the predecessor walks forward from the head, so this is
    /// linear in the element count; the stack uses of this container hold
    /// only a handful of elements.
    pub fn pop_back(&mut self) -> Result<Option<Vec<u8>>> {
        if self.count == 0 {
            return Ok(None);
        }
        let data = self.read_payload(self.tail)?;
        if self.count == 1 {
            self.clear()?;
            return Ok(Some(data));
        }

        let mut prev = self.head;
        for _ in 0..self.count - 2 {
            let pos = self.advance(prev);
            prev = self.read_element(pos)?;
        }

        let released = self.tail;
        self.write_header(self.file_len, self.count - 1, self.head.pos, prev.pos)?;
        self.tail = prev;
        self.count -= 1;
        self.generation += 1;
        if self.zero {
            self.ring_erase(
                released.pos,
                ELEMENT_HEADER_LENGTH + u64::from(released.len),
            )?;
        }
        Ok(Some(data))
    }

    /// Overwrites the oldest element's payload in place.
    ///
    /// The replacement must have the same length; the write is a single
    /// payload-sized overwrite with no header change, so it inherits the
    /// same atomicity assumption as the header itself.
    pub fn rewrite_front(&mut self, data: &[u8]) -> Result<()> {
        if self.count == 0 {
            return Err(StoreError::InvalidArgument(
                "cannot rewrite the front of an empty ring".into(),
            ));
        }
        if data.len() != self.head.len as usize {
            return Err(StoreError::InvalidArgument(format!(
                "rewrite length {} does not match element length {}",
                data.len(),
                self.head.len
            )));
        }
        let pos = self.wrap(self.head.pos + ELEMENT_HEADER_LENGTH);
        self.ring_write(pos, data)?;
        self.sync_data()?;
        self.generation += 1;
        Ok(())
    }

    /// Iterates the elements from oldest to newest.
    pub fn iter(&self) -> RingIter<'_> {
        RingIter {
            ring: self,
            pos: self.head.pos,
            remaining: self.count,
            generation: self.generation,
        }
    }

    /// Removes every element and truncates the file to its initial size.
    pub fn clear(&mut self) -> Result<()> {
        self.write_header(INITIAL_LENGTH, 0, 0, 0)?;
        if self.zero {
            write_all_at(&self.file, HEADER_LENGTH, &ZEROES[..(INITIAL_LENGTH - HEADER_LENGTH) as usize])?;
            self.sync_data()?;
        }
        if self.file_len > INITIAL_LENGTH {
            self.file.set_len(INITIAL_LENGTH)?;
            self.file.sync_all()?;
        }
        self.file_len = INITIAL_LENGTH;
        self.count = 0;
        self.head = Element::NULL;
        self.tail = Element::NULL;
        self.generation += 1;
        Ok(())
    }

    /// Forces buffered data to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Doubles the file length until an element of `needed` bytes fits.
    fn expand_if_necessary(&mut self, needed: u64) -> Result<()> {
        let mut remaining = self.remaining_bytes();
        if remaining >= needed {
            return Ok(());
        }

        let previous_len = self.file_len;
        let mut new_len = self.file_len;
        while remaining < needed {
            remaining += new_len;
            new_len <<= 1;
        }
        self.file.set_len(new_len)?;
        self.file.sync_all()?;

        // If the occupied span wraps past the old end of file, copy the
        // wrapped prefix forward so the span is contiguous after growth.
        let tail_end = self.advance(self.tail);
        let mut copied = 0u64;
        if self.count > 0 && tail_end <= self.head.pos {
            copied = tail_end - HEADER_LENGTH;
            copy_within(&self.file, HEADER_LENGTH, previous_len, copied)?;
        }

        let new_tail_pos = if self.tail.pos < self.head.pos {
            previous_len + self.tail.pos - HEADER_LENGTH
        } else {
            self.tail.pos
        };
        self.write_header(new_len, self.count, self.head.pos, new_tail_pos)?;
        self.tail.pos = new_tail_pos;
        self.file_len = new_len;

        if self.zero && copied > 0 {
            self.ring_erase(HEADER_LENGTH, copied)?;
        }
        debug!(
            path = %self.path.display(),
            old_len = previous_len,
            new_len,
            "ring file expanded"
        );
        Ok(())
    }

    fn write_header(&mut self, file_len: u64, count: u32, head_pos: u64, tail_pos: u64) -> Result<()> {
        let mut header = [0u8; HEADER_LENGTH as usize];
        header[0..4].copy_from_slice(&(file_len as u32).to_be_bytes());
        header[4..8].copy_from_slice(&count.to_be_bytes());
        header[8..12].copy_from_slice(&(head_pos as u32).to_be_bytes());
        header[12..16].copy_from_slice(&(tail_pos as u32).to_be_bytes());
        write_all_at(&self.file, 0, &header)?;
        self.sync_data()?;
        Ok(())
    }

    fn sync_data(&self) -> Result<()> {
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn read_element(&self, pos: u64) -> Result<Element> {
        if pos < HEADER_LENGTH || pos >= self.file_len {
            return Err(StoreError::Corruption(format!(
                "ring element offset {pos} outside file of {} bytes",
                self.file_len
            )));
        }
        let mut len_buf = [0u8; ELEMENT_HEADER_LENGTH as usize];
        self.ring_read(pos, &mut len_buf)?;
        Ok(Element {
            pos,
            len: u32::from_be_bytes(len_buf),
        })
    }

    fn read_payload(&self, element: Element) -> Result<Vec<u8>> {
        let mut data = vec![0u8; element.len as usize];
        self.ring_read(self.wrap(element.pos + ELEMENT_HEADER_LENGTH), &mut data)?;
        Ok(data)
    }

    /// Offset of the element following `element`, wrapped into the ring.
    fn advance(&self, element: Element) -> u64 {
        self.wrap(element.pos + ELEMENT_HEADER_LENGTH + u64::from(element.len))
    }

    fn wrap(&self, pos: u64) -> u64 {
        if pos < self.file_len {
            pos
        } else {
            HEADER_LENGTH + (pos - self.file_len)
        }
    }

    fn ring_read(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let pos = self.wrap(pos);
        let count = buf.len() as u64;
        if pos + count <= self.file_len {
            read_exact_at(&self.file, pos, buf)?;
        } else {
            let before_eof = (self.file_len - pos) as usize;
            read_exact_at(&self.file, pos, &mut buf[..before_eof])?;
            read_exact_at(&self.file, HEADER_LENGTH, &mut buf[before_eof..])?;
        }
        Ok(())
    }

    fn ring_write(&self, pos: u64, buf: &[u8]) -> Result<()> {
        let pos = self.wrap(pos);
        let count = buf.len() as u64;
        if pos + count <= self.file_len {
            write_all_at(&self.file, pos, buf)?;
        } else {
            let before_eof = (self.file_len - pos) as usize;
            write_all_at(&self.file, pos, &buf[..before_eof])?;
            write_all_at(&self.file, HEADER_LENGTH, &buf[before_eof..])?;
        }
        Ok(())
    }

    fn ring_erase(&self, mut pos: u64, mut length: u64) -> Result<()> {
        while length > 0 {
            let chunk = length.min(ZEROES.len() as u64) as usize;
            self.ring_write(pos, &ZEROES[..chunk])?;
            length -= chunk as u64;
            pos = self.wrap(pos + chunk as u64);
        }
        self.sync_data()?;
        Ok(())
    }
}

/// Iterator over ring elements, oldest to newest.
///
/// Yields `Err` if the underlying file fails to read or the ring is
/// structurally modified while the iterator is live.
#[derive(Debug)]
pub struct RingIter<'a> {
    ring: &'a RingFile,
    pos: u64,
    remaining: u32,
    generation: u64,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        if self.generation != self.ring.generation {
            self.remaining = 0;
            return Some(Err(StoreError::Corruption(
                "ring modified during iteration".into(),
            )));
        }
        let element = match self.ring.read_element(self.pos) {
            Ok(element) => element,
            Err(err) => {
                self.remaining = 0;
                return Some(Err(err));
            }
        };
        let payload = match self.ring.read_payload(element) {
            Ok(payload) => payload,
            Err(err) => {
                self.remaining = 0;
                return Some(Err(err));
            }
        };
        self.pos = self.ring.advance(element);
        self.remaining -= 1;
        Some(Ok(payload))
    }
}

/// Creates the file through a temp sibling plus atomic rename, so a crash
/// during initialization never leaves a half-written header behind.
fn initialize_file(path: &Path) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.set_len(INITIAL_LENGTH)?;
        let mut header = [0u8; HEADER_LENGTH as usize];
        header[0..4].copy_from_slice(&(INITIAL_LENGTH as u32).to_be_bytes());
        write_all_at(&tmp, 0, &header)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_exact_at(file: &File, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut reader = file;
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(buf)?;
    Ok(())
}

fn write_all_at(file: &File, offset: u64, buf: &[u8]) -> Result<()> {
    let mut writer = file;
    writer.seek(SeekFrom::Start(offset))?;
    writer.write_all(buf)?;
    Ok(())
}

fn copy_within(file: &File, mut src: u64, mut dst: u64, mut count: u64) -> Result<()> {
    let mut buf = [0u8; 4096];
    while count > 0 {
        let chunk = count.min(buf.len() as u64) as usize;
        read_exact_at(file, src, &mut buf[..chunk])?;
        write_all_at(file, dst, &buf[..chunk])?;
        src += chunk as u64;
        dst += chunk as u64;
        count -= chunk as u64;
    }
    Ok(())
}
