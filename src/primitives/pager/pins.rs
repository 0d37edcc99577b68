#![forbid(unsafe_code)]

use std::sync::Arc;

use smallvec::SmallVec;

use super::epoch::MappingEpoch;
use crate::types::EpochId;

/// Epochs a transaction must release when it completes.
///
/// Every entry stands for exactly one acquired reference. Most transactions
/// only ever touch one or two epochs, hence the inline storage. Outside the
/// crate the set is observable only; entries are added and released by the
/// owning [`Txn`](super::Txn).
#[derive(Default)]
pub struct PinSet {
    held: SmallVec<[Arc<MappingEpoch>; 2]>,
}

impl PinSet {
    /// Creates an empty pin set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of epochs currently pinned.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True if nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// True if `epoch` is pinned by this set.
    pub fn contains(&self, epoch: EpochId) -> bool {
        self.position(epoch).is_some()
    }

    /// Identifiers of the pinned epochs, in pin order.
    pub fn epochs(&self) -> impl Iterator<Item = EpochId> + '_ {
        self.held.iter().map(|epoch| epoch.id())
    }

    pub(crate) fn position(&self, epoch: EpochId) -> Option<usize> {
        self.held.iter().position(|held| held.id() == epoch)
    }

    pub(crate) fn get(&self, idx: usize) -> &MappingEpoch {
        &self.held[idx]
    }

    /// Records an epoch superseded by a growth this transaction triggered.
    ///
    /// The set becomes responsible for releasing it at completion. If the
    /// transaction already pins the epoch, that pin covers it; otherwise a
    /// reference is acquired now. The caller must still hold the epoch live
    /// (the pager calls this before dropping its own slot reference).
    pub(crate) fn register_superseded(&mut self, epoch: Arc<MappingEpoch>) {
        if self.contains(epoch.id()) {
            return;
        }
        epoch.acquire();
        self.held.push(epoch);
    }

    /// Takes over a reference that was already acquired on this set's behalf.
    pub(crate) fn adopt(&mut self, epoch: Arc<MappingEpoch>) {
        if self.contains(epoch.id()) {
            epoch.release();
            return;
        }
        self.held.push(epoch);
    }

    pub(crate) fn push_acquired(&mut self, epoch: Arc<MappingEpoch>) -> usize {
        debug_assert!(!self.contains(epoch.id()));
        self.held.push(epoch);
        self.held.len() - 1
    }

    /// Releases every pinned epoch exactly once and empties the set.
    pub(crate) fn release_all(&mut self) -> usize {
        let count = self.held.len();
        for epoch in self.held.drain(..) {
            epoch.release();
        }
        count
    }
}

impl Drop for PinSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for PinSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.epochs()).finish()
    }
}
