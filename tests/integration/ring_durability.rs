//! Durability tests for the ring-buffer container.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use levelgraph::error::{Result, StoreError};
use levelgraph::primitives::ring::{RingFile, RingFileBuilder, INITIAL_LENGTH};
use tempfile::tempdir;

fn open_ring(path: &std::path::Path) -> Result<RingFile> {
    RingFileBuilder::new(path).open()
}

#[test]
fn contents_survive_reopen() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ring");
    {
        let mut ring = open_ring(&path)?;
        ring.push(b"a")?;
        ring.push(b"b")?;
        ring.push(b"c")?;
    }

    let mut ring = open_ring(&path)?;
    assert_eq!(ring.len(), 3);
    assert_eq!(ring.peek_back()?.as_deref(), Some(&b"c"[..]));
    assert_eq!(ring.pop_front()?.as_deref(), Some(&b"a"[..]));
    assert_eq!(ring.pop_front()?.as_deref(), Some(&b"b"[..]));
    assert_eq!(ring.pop_front()?.as_deref(), Some(&b"c"[..]));
    assert!(ring.is_empty());
    Ok(())
}

#[test]
fn growth_past_initial_length_survives_reopen() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ring");
    {
        let mut ring = open_ring(&path)?;
        for i in 0..20u8 {
            ring.push(&[i; 512])?;
        }
    }
    assert!(std::fs::metadata(&path).expect("metadata").len() > INITIAL_LENGTH);

    let ring = open_ring(&path)?;
    assert_eq!(ring.len(), 20);
    let elements: Vec<Vec<u8>> = ring.iter().collect::<Result<_>>()?;
    for (i, element) in elements.iter().enumerate() {
        assert_eq!(element.as_slice(), &[i as u8; 512][..]);
    }
    Ok(())
}

#[test]
fn header_claiming_more_than_the_file_is_rejected() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ring");
    {
        let mut ring = open_ring(&path)?;
        for i in 0..20u8 {
            ring.push(&[i; 512])?;
        }
    }
    let file = OpenOptions::new().write(true).open(&path)?;
    file.set_len(INITIAL_LENGTH)?;
    drop(file);

    assert!(matches!(open_ring(&path), Err(StoreError::Corruption(_))));
    Ok(())
}

#[test]
fn undersized_header_length_is_rejected() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ring");
    drop(open_ring(&path)?);

    let mut file = OpenOptions::new().write(true).open(&path)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&8u32.to_be_bytes())?;
    drop(file);

    assert!(matches!(open_ring(&path), Err(StoreError::Corruption(_))));
    Ok(())
}

#[test]
fn stack_discipline_survives_reopen() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("ring");
    {
        let mut ring = open_ring(&path)?;
        ring.push(&1u64.to_be_bytes())?;
        ring.push(&2u64.to_be_bytes())?;
        ring.push(&3u64.to_be_bytes())?;
        ring.rewrite_front(&9u64.to_be_bytes())?;
    }

    let mut ring = open_ring(&path)?;
    assert_eq!(ring.pop_back()?.as_deref(), Some(&3u64.to_be_bytes()[..]));
    assert_eq!(ring.pop_back()?.as_deref(), Some(&2u64.to_be_bytes()[..]));
    assert_eq!(ring.peek_front()?.as_deref(), Some(&9u64.to_be_bytes()[..]));
    Ok(())
}
