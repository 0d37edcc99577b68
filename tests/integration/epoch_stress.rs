#![allow(missing_docs)]

use std::sync::Barrier;
use std::thread;

use mmpager::{PageId, Pager, PagerOptions, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const THREADS: usize = 8;
const PAGE: u64 = 4096;
const SEED: u64 = 0x5eed_e90c;

fn run_workers<F>(pager: &Pager, work: F) -> Result<()>
where
    F: Fn(usize, &Pager) -> Result<()> + Sync,
{
    let barrier = Barrier::new(THREADS);
    let results: Vec<Result<()>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|worker| {
                let (barrier, work) = (&barrier, &work);
                scope.spawn(move || {
                    barrier.wait();
                    work(worker, pager)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker panicked"))
            .collect()
    });
    results.into_iter().collect()
}

#[test]
fn concurrent_transactions_each_release_their_pins() -> Result<()> {
    let pager = Pager::scratch(PagerOptions::default())?;
    {
        let txn = pager.begin()?;
        txn.ensure_capacity(16 * PAGE)?;
    }
    let epoch = pager.current();
    run_workers(&pager, |worker, pager| {
        for round in 0..500u64 {
            let txn = pager.begin()?;
            let page = txn.page(PageId((worker as u64 + round) % 16))?;
            assert_eq!(page.data().len(), PAGE as usize);
            drop(page);
            if round % 2 == 0 {
                txn.commit();
            } else {
                txn.abort();
            }
        }
        Ok(())
    })?;
    assert_eq!(epoch.ref_count(), 1);
    assert!(!epoch.is_released());
    assert_eq!(pager.stats().latched_pages, 0);
    Ok(())
}

#[test]
fn random_reads_and_growths_leave_one_live_epoch() -> Result<()> {
    let pager = Pager::scratch(PagerOptions::default())?;
    {
        let txn = pager.begin()?;
        txn.ensure_capacity(4 * PAGE)?;
    }
    run_workers(&pager, |worker, pager| {
        let mut rng = ChaCha8Rng::seed_from_u64(SEED + worker as u64);
        for _ in 0..200 {
            let txn = pager.begin()?;
            for _ in 0..rng.gen_range(1..8) {
                if rng.gen_bool(0.1) {
                    let extra = rng.gen_range(1..4u64);
                    txn.ensure_capacity((pager.allocated_pages() + extra) * PAGE)?;
                } else {
                    let id = rng.gen_range(0..pager.allocated_pages());
                    assert_eq!(txn.page(PageId(id))?.id(), PageId(id));
                }
            }
            match rng.gen_range(0..3) {
                0 => txn.commit(),
                1 => txn.abort(),
                _ => drop(txn),
            }
        }
        Ok(())
    })?;

    let stats = pager.stats();
    assert_eq!(stats.live_epochs, 1);
    assert_eq!(stats.epochs_created, stats.growths + 1);
    assert_eq!(stats.epochs_torn_down, stats.growths);
    assert_eq!(stats.latched_pages, 0);
    assert_eq!(pager.current().ref_count(), 1);
    Ok(())
}

#[test]
fn views_held_across_growth_survive_until_their_transaction_ends() -> Result<()> {
    let pager = Pager::scratch(PagerOptions::default())?;
    {
        let mut txn = pager.begin()?;
        txn.ensure_capacity(THREADS as u64 * PAGE)?;
        for id in 0..THREADS as u64 {
            txn.page_mut(PageId(id))?.data_mut()[0] = id as u8 + 1;
        }
        txn.commit();
    }
    let initial = pager.current();
    run_workers(&pager, |worker, pager| {
        let txn = pager.begin()?;
        let view = txn.page(PageId(worker as u64))?;
        for step in 0..8u64 {
            txn.ensure_capacity((THREADS as u64 + 1 + worker as u64 * 8 + step) * PAGE)?;
            assert_eq!(view.data()[0], worker as u8 + 1);
        }
        drop(view);
        txn.commit();
        Ok(())
    })?;
    assert!(initial.is_released());
    assert_eq!(pager.stats().live_epochs, 1);
    Ok(())
}
