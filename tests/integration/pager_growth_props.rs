#![allow(missing_docs)]

use mmpager::{PageId, Pager, PagerOptions};
use proptest::prelude::*;

const PAGE: u64 = 4096;

#[derive(Debug, Clone)]
enum Step {
    Grow(u64),
    Complete,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (1u64..=48 * PAGE).prop_map(Step::Grow),
        1 => Just(Step::Complete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn growth_covers_request_and_never_shrinks(
        steps in prop::collection::vec(step(), 1..24),
        min_grow_pages in 1u64..4,
    ) {
        let options = PagerOptions::default().with_min_grow_pages(min_grow_pages);
        let pager = Pager::scratch(options).unwrap();
        let mut txn = Some(pager.begin().unwrap());
        let mut last = pager.allocated_pages();

        for step in steps {
            match step {
                Step::Grow(len) => {
                    let active = txn.get_or_insert_with(|| pager.begin().unwrap());
                    active.ensure_capacity(len).unwrap();
                    let allocated = pager.allocated_pages();
                    prop_assert!(allocated * PAGE >= len);
                    prop_assert!(allocated >= last);
                    prop_assert_eq!(allocated * PAGE, pager.current().capacity_bytes());
                    if allocated > 0 {
                        let page = active.page(PageId(allocated - 1)).unwrap();
                        prop_assert_eq!(page.data().len(), PAGE as usize);
                    }
                    last = allocated;
                }
                Step::Complete => {
                    if let Some(done) = txn.take() {
                        done.commit();
                    }
                }
            }
        }

        drop(txn);
        let stats = pager.stats();
        prop_assert_eq!(stats.live_epochs, 1);
        prop_assert_eq!(stats.epochs_created, stats.growths + 1);
        prop_assert_eq!(pager.current().ref_count(), 1);
    }
}
