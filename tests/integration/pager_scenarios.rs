#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use mmpager::{EpochId, PageId, Pager, PagerOptions, Result};
use tempfile::tempdir;

const PAGE: u64 = 4096;

fn preallocated(path: &Path, pages: u64) -> Result<Pager> {
    fs::write(path, vec![0u8; (pages * PAGE) as usize])?;
    Pager::open(path, PagerOptions::default())
}

#[test]
fn empty_store_grows_to_three_pages() -> Result<()> {
    let dir = tempdir()?;
    let pager = Pager::open(dir.path().join("a.db"), PagerOptions::default())?;
    assert_eq!(pager.allocated_pages(), 0);

    let txn = pager.begin()?;
    txn.ensure_capacity(12_288)?;
    assert_eq!(pager.allocated_pages(), 3);
    assert!(pager.allocated_pages() * PAGE >= 12_288);

    let page = txn.page(PageId(2))?;
    assert_eq!(page.offset(), 8192);
    assert_eq!(page.page_size(), PAGE as usize);
    Ok(())
}

#[test]
fn reader_keeps_old_epoch_across_foreign_growth() -> Result<()> {
    let dir = tempdir()?;
    let pager = preallocated(&dir.path().join("b.db"), 10)?;
    assert_eq!(pager.allocated_pages(), 10);
    let s0 = pager.current();

    {
        let mut seed = pager.begin()?;
        seed.page_mut(PageId(7))?.data_mut()[..5].copy_from_slice(b"seven");
        seed.commit();
    }

    let reader = pager.begin()?;
    let before = reader.page(PageId(7))?;
    assert_eq!(before.epoch(), s0.id());
    assert_eq!(&before.data()[..5], b"seven");

    let grower = pager.begin()?;
    grower.ensure_capacity(20 * PAGE)?;
    assert_eq!(pager.allocated_pages(), 20);
    let s1 = pager.current();
    assert_ne!(s1.id(), s0.id());
    assert!(grower.pinned_epochs().contains(&s0.id()));
    assert!(!reader.pinned_epochs().contains(&s1.id()));

    // Pager slot dropped; reader and grower still hold the old mapping.
    assert_eq!(s0.ref_count(), 2);
    assert_eq!(&before.data()[..5], b"seven");

    grower.commit();
    assert!(!s0.is_released());
    assert_eq!(&before.data()[..5], b"seven");

    // A fresh lookup goes through the new epoch and sees the same bytes.
    let after = reader.page(PageId(7))?;
    assert_eq!(after.epoch(), s1.id());
    assert_eq!(&after.data()[..5], b"seven");
    assert_eq!(&before.data()[..5], b"seven");

    drop(before);
    drop(after);
    reader.commit();
    assert!(s0.is_released());
    assert!(!s1.is_released());
    assert_eq!(pager.stats().live_epochs, 1);
    Ok(())
}

#[test]
fn sequential_growths_release_superseded_epochs_promptly() -> Result<()> {
    let dir = tempdir()?;
    let pager = preallocated(&dir.path().join("c.db"), 10)?;
    let s10 = pager.current();

    let first = pager.begin()?;
    first.ensure_capacity(20 * PAGE)?;
    let s20 = pager.current();
    assert_eq!(s20.capacity_pages(), 20);
    first.commit();
    assert!(s10.is_released());
    assert_eq!(pager.stats().epochs_torn_down, 1);

    let second = pager.begin()?;
    second.ensure_capacity(30 * PAGE)?;
    let s30 = pager.current();
    assert_eq!(pager.allocated_pages(), 30);
    assert!(!s20.is_released());
    second.commit();
    assert!(s20.is_released());
    assert!(!s30.is_released());

    let stats = pager.stats();
    assert_eq!(stats.epochs_created, 3);
    assert_eq!(stats.epochs_torn_down, 2);
    assert_eq!(stats.growths, 2);
    assert_eq!(stats.current_epoch, EpochId(2));
    Ok(())
}

#[test]
fn aborted_grower_leaves_reader_pins_intact() -> Result<()> {
    let pager = Pager::scratch(PagerOptions::default())?;
    {
        let setup = pager.begin()?;
        setup.ensure_capacity(4 * PAGE)?;
    }
    let s1 = pager.current();
    let reader = pager.begin()?;
    let view = reader.page(PageId(3))?;

    let grower = pager.begin()?;
    grower.ensure_capacity(8 * PAGE)?;
    assert_eq!(grower.pinned_epochs(), vec![s1.id(), pager.current().id()]);
    grower.abort();

    assert!(!s1.is_released());
    assert_eq!(view.data().len(), PAGE as usize);
    drop(view);
    reader.commit();
    assert!(s1.is_released());
    Ok(())
}

#[test]
fn dropped_transaction_releases_like_commit() -> Result<()> {
    let pager = Pager::scratch(PagerOptions::default())?;
    let s0 = pager.current();
    {
        let txn = pager.begin()?;
        txn.ensure_capacity(2 * PAGE)?;
        assert_eq!(s0.ref_count(), 1);
    }
    assert!(s0.is_released());
    assert_eq!(pager.current().ref_count(), 1);
    Ok(())
}
