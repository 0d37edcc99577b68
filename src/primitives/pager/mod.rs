mod epoch;
mod latch;
mod page;
mod pager;
mod pins;

pub use epoch::MappingEpoch;
pub use page::{Page, PageMut};
pub use pager::{Pager, PagerOptions, PagerStats, Txn, DEFAULT_PAGE_SIZE};
pub use pins::PinSet;
