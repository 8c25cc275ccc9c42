//! Fetch slots: how many workers may hold a claim at once.
//!
//! Without a governor the limit is `max_concurrent`, which every worker
//! always satisfies. With one, the limit follows the governor's target and
//! workers past it idle before claiming. Lowering the limit never interrupts
//! a fetch in flight; its slot is simply not handed out again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::governor::ConcurrencyGovernor;

pub(super) struct FetchSlots {
    active: AtomicUsize,
    max: usize,
    governor: Option<Arc<ConcurrencyGovernor>>,
}

impl FetchSlots {
    pub(super) fn new(max: usize, governor: Option<Arc<ConcurrencyGovernor>>) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max: max.max(1),
            governor,
        }
    }

    pub(super) fn limit(&self) -> usize {
        self.governor
            .as_ref()
            .map_or(self.max, |g| g.target())
            .clamp(1, self.max)
    }

    pub(super) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Take a slot if fewer than `limit()` are held.
    pub(super) fn try_acquire(&self) -> Option<SlotPermit<'_>> {
        let limit = self.limit();
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotPermit(self))
    }
}

/// Held from claim to resolution; releases the slot on drop.
pub(super) struct SlotPermit<'a>(&'a FetchSlots);

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}
