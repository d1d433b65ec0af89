//! Write-ahead log behaviour across process lifetimes.

use levelgraph::error::Result;
use levelgraph::model::{Direction, Edge, Node};
use levelgraph::wal::{WalEntry, WriteAheadLog, DEFAULT_WAL_CAPACITY};
use tempfile::tempdir;

#[test]
fn pending_entries_survive_reopen_in_order() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("wal");

    let node = Node::new(1);
    let edge = Edge::with_direction(1, 2, 100, Direction::Incoming);
    {
        let mut wal = WriteAheadLog::open(&path, DEFAULT_WAL_CAPACITY, true, true)?;
        wal.append(&WalEntry::NodeCreate(node.clone()))?;
        wal.append(&WalEntry::EdgeCreate(edge.clone()))?;
        wal.append(&WalEntry::EdgePropertyUpdate {
            edge: 100,
            payload: vec![1, 2, 3],
        })?;
    }

    let mut wal = WriteAheadLog::open(&path, DEFAULT_WAL_CAPACITY, true, true)?;
    assert_eq!(wal.len(), 3);
    let scanned: Vec<WalEntry> = wal.iter().collect::<Result<_>>()?;
    assert_eq!(scanned[0], WalEntry::NodeCreate(node.clone()));
    assert_eq!(scanned[1], WalEntry::EdgeCreate(edge.clone()));

    assert_eq!(wal.dequeue_next()?, Some(WalEntry::NodeCreate(node)));
    assert_eq!(wal.dequeue_next()?, Some(WalEntry::EdgeCreate(edge)));
    assert_eq!(
        wal.dequeue_next()?,
        Some(WalEntry::EdgePropertyUpdate {
            edge: 100,
            payload: vec![1, 2, 3],
        })
    );
    assert_eq!(wal.dequeue_next()?, None);
    Ok(())
}

#[test]
fn clear_empties_the_log_durably() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("wal");
    {
        let mut wal = WriteAheadLog::open(&path, DEFAULT_WAL_CAPACITY, true, true)?;
        for id in 0..50 {
            wal.append(&WalEntry::NodeDelete(id))?;
        }
        wal.clear()?;
    }
    let wal = WriteAheadLog::open(&path, DEFAULT_WAL_CAPACITY, true, true)?;
    assert!(wal.is_empty());
    assert!(!wal.is_full());
    Ok(())
}

#[test]
fn fullness_is_observed_after_reopen() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("wal");
    {
        let mut wal = WriteAheadLog::open(&path, 128, true, true)?;
        for id in 0..20 {
            wal.append(&WalEntry::NodeDelete(id))?;
        }
        assert!(wal.is_full());
    }
    let wal = WriteAheadLog::open(&path, 128, true, true)?;
    assert!(wal.is_full());
    Ok(())
}
