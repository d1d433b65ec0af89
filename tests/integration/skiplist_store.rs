//! Skip-list relationship store behaviour across reopens.

use levelgraph::error::Result;
use levelgraph::storage::skiplist::{RelationshipRecord, SkipListStore};
use tempfile::tempdir;

fn open_store(dir: &std::path::Path) -> Result<SkipListStore> {
    SkipListStore::open(dir.join("graph.rels"), true, true)
}

#[test]
fn chain_concatenation_is_creation_order() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let mut store = open_store(dir.path())?;

    // Eleven relationships on node 1, spread over three partial reopens
    // to make sure the chain tail is rediscovered from disk each time.
    let mut next_rel = 1u64;
    for _ in 0..3 {
        for _ in 0..3 {
            store.update_record(&RelationshipRecord::created(next_rel, 1, 1000 + next_rel))?;
            next_rel += 1;
        }
        store.close()?;
        store = open_store(dir.path())?;
    }
    store.update_record(&RelationshipRecord::created(next_rel, 1, 1000 + next_rel))?;
    store.update_record(&RelationshipRecord::created(next_rel + 1, 1, 999))?;

    assert_eq!(store.node_relationships(1)?, (1..=11u64).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn records_link_back_into_their_chains() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let mut store = open_store(dir.path())?;
    for rel_id in 1..=6u64 {
        store.update_record(&RelationshipRecord::created(rel_id, 2, 50))?;
    }

    // Slot 0 of the second block: predecessor comes from the previous
    // block's last slot.
    let rec = store.get_record(5)?.expect("record 5 is live");
    assert_eq!(rec.first_node, 2);
    assert_eq!(rec.second_node, 50);
    assert_eq!(rec.first_prev_rel, Some(4));
    assert_eq!(rec.first_next_rel, Some(6));

    let head = store.get_record(1)?.expect("record 1 is live");
    assert_eq!(head.first_prev_rel, None);
    assert_eq!(head.first_next_rel, Some(2));

    let tail = store.get_record(6)?.expect("record 6 is live");
    assert_eq!(tail.first_prev_rel, Some(5));
    assert_eq!(tail.first_next_rel, None);
    Ok(())
}

#[test]
fn both_endpoints_see_the_same_relationship() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let mut store = open_store(dir.path())?;
    store.update_record(&RelationshipRecord::created(1, 10, 20))?;

    assert_eq!(store.node_relationships(10)?, vec![1]);
    assert_eq!(store.node_relationships(20)?, vec![1]);

    let rec = store.get_record(1)?.expect("record 1 is live");
    assert_eq!((rec.first_node, rec.second_node), (10, 20));
    Ok(())
}

#[test]
fn deletion_survives_reopen() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    {
        let mut store = open_store(dir.path())?;
        store.update_record(&RelationshipRecord::created(1, 3, 4))?;
        store.update_record(&RelationshipRecord::created(2, 3, 5))?;

        let mut rec = store.get_record(1)?.expect("record 1 is live");
        rec.in_use = false;
        store.update_record(&rec)?;
        store.close()?;
    }

    let store = open_store(dir.path())?;
    assert!(!store.is_in_use(1)?);
    assert!(store.is_in_use(2)?);
    assert!(store.get_record(1)?.is_none());
    Ok(())
}

#[test]
fn untouched_nodes_have_no_relationships() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let mut store = open_store(dir.path())?;
    store.update_record(&RelationshipRecord::created(1, 100, 200))?;

    // Node 150 sits inside the sentinel-padded pointer range, node 900
    // past it.
    assert_eq!(store.node_relationships(150)?, Vec::<u64>::new());
    assert_eq!(store.node_relationships(900)?, Vec::<u64>::new());
    Ok(())
}
