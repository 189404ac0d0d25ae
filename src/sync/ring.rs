use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use tracing::error;

use super::WorkerId;
use crate::error::RingError;

/// Fixed ring of exclusive resource slots ("forks").
///
/// Each slot stores the id of the worker holding it, or [`ResourceRing::FREE`].
/// Every transition is a single compare-and-swap, so two workers can never both
/// observe a slot as free and both claim it.
pub struct ResourceRing {
    holders: Vec<AtomicUsize>,
}

impl ResourceRing {
    const FREE: usize = usize::MAX;
    // Spins before yielding, yields before parking
    const SPINS: u32 = 6;
    const YIELDS: u32 = 10;
    const PARK: Duration = Duration::from_micros(50);

    pub fn new(size: usize) -> Self {
        assert!(size >= 2, "Expect a ring of at least 2 resources, got {size}");
        Self {
            holders: (0..size).map(|_| AtomicUsize::new(Self::FREE)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn holder(&self, index: usize) -> Option<WorkerId> {
        match self.holders[index].load(Ordering::SeqCst) {
            Self::FREE => None,
            w => Some(w),
        }
    }

    pub fn is_all_free(&self) -> bool {
        self.holders
            .iter()
            .all(|h| h.load(Ordering::SeqCst) == Self::FREE)
    }

    /// Point-in-time view of every slot. Not atomic across slots.
    pub fn snapshot(&self) -> Vec<Option<WorkerId>> {
        (0..self.len()).map(|i| self.holder(i)).collect()
    }

    /// `(index, holder)` of every slot currently held.
    pub fn held(&self) -> Vec<(usize, WorkerId)> {
        self.snapshot()
            .into_iter()
            .enumerate()
            .filter_map(|(i, h)| h.map(|w| (i, w)))
            .collect()
    }

    /// Claims `index` for `worker` if it is free. Never blocks.
    ///
    /// # Panics
    /// If `index` is outside the ring.
    pub fn try_acquire(&self, index: usize, worker: WorkerId) -> bool {
        debug_assert_ne!(worker, Self::FREE);
        self.holders[index]
            .compare_exchange(Self::FREE, worker, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Blocks until `index` is free, then claims it.
    ///
    /// Acquiring a slot the caller already holds would wait forever on itself,
    /// so it is rejected.
    pub fn acquire(&self, index: usize, worker: WorkerId) -> Result<(), RingError> {
        self.check_reentrant(index, worker)?;
        let mut step = 0;
        while !self.try_acquire(index, worker) {
            snooze(&mut step);
        }
        Ok(())
    }

    /// Like [`ResourceRing::acquire`] but gives up after `timeout`.
    /// Returns whether the slot was claimed.
    pub fn acquire_timeout(
        &self,
        index: usize,
        worker: WorkerId,
        timeout: Duration,
    ) -> Result<bool, RingError> {
        self.check_reentrant(index, worker)?;
        let deadline = Instant::now() + timeout;
        let mut step = 0;
        loop {
            if self.try_acquire(index, worker) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            snooze(&mut step);
        }
    }

    /// Frees `index`. Only the holder may release a slot.
    pub fn release(&self, index: usize, worker: WorkerId) -> Result<(), RingError> {
        self.holders[index]
            .compare_exchange(worker, Self::FREE, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|holder| RingError::ReleaseNotHeld {
                index,
                worker,
                holder: (holder != Self::FREE).then_some(holder),
            })
    }

    pub fn try_claim(&self, index: usize, worker: WorkerId) -> Option<ResourceGuard<'_>> {
        self.try_acquire(index, worker)
            .then(|| ResourceGuard::new(self, index, worker))
    }

    pub fn claim(&self, index: usize, worker: WorkerId) -> Result<ResourceGuard<'_>, RingError> {
        self.acquire(index, worker)?;
        Ok(ResourceGuard::new(self, index, worker))
    }

    pub fn claim_timeout(
        &self,
        index: usize,
        worker: WorkerId,
        timeout: Duration,
    ) -> Result<Option<ResourceGuard<'_>>, RingError> {
        Ok(self
            .acquire_timeout(index, worker, timeout)?
            .then(|| ResourceGuard::new(self, index, worker)))
    }

    fn check_reentrant(&self, index: usize, worker: WorkerId) -> Result<(), RingError> {
        if self.holder(index) == Some(worker) {
            return Err(RingError::ReentrantAcquire { index, worker });
        }
        Ok(())
    }
}

fn snooze(step: &mut u32) {
    if *step < ResourceRing::SPINS {
        (0..1 << *step).for_each(|_| std::hint::spin_loop());
    } else if *step < ResourceRing::SPINS + ResourceRing::YIELDS {
        std::thread::yield_now();
    } else {
        std::thread::sleep(ResourceRing::PARK);
    }
    *step = step.saturating_add(1);
}

/// A held slot. Released on drop unless [`ResourceGuard::release`] was called.
#[must_use = "dropping the guard releases the resource immediately"]
pub struct ResourceGuard<'r> {
    ring: &'r ResourceRing,
    index: usize,
    worker: WorkerId,
    released: bool,
}

impl<'r> ResourceGuard<'r> {
    fn new(ring: &'r ResourceRing, index: usize, worker: WorkerId) -> Self {
        Self {
            ring,
            index,
            worker,
            released: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn release(mut self) -> Result<(), RingError> {
        // drop() runs after this, book-keep so it does not release again
        self.released = true;
        self.ring.release(self.index, self.worker)
    }
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.ring.release(self.index, self.worker) {
            error!(worker = self.worker, index = self.index, %e, "release on drop failed");
        }
    }
}
