use std::time::Duration;

use tracing::trace;

use super::{
    ring::{ResourceGuard, ResourceRing},
    AcquisitionStrategy, Contender, Held, StrategyKind, WorkerState,
};
use crate::error::RingError;

/// Left, then right, each blocking until free.
///
/// No ordering or tie-breaking: when every worker holds its left resource, each
/// right resource is some other worker's left and the ring is in circular wait.
/// Waits are cut into `poll_interval` slices only so the stop signal can be
/// observed; the left resource stays held while waiting for the right one.
pub struct BlockingOrdered {
    handoff_delay: Duration,
}

impl BlockingOrdered {
    /// `handoff_delay` is a pause between taking left and reaching for right.
    pub fn new(handoff_delay: Duration) -> Self {
        Self { handoff_delay }
    }
}

impl AcquisitionStrategy for BlockingOrdered {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BlockingOrdered
    }

    fn acquire<'r>(
        &self,
        ring: &'r ResourceRing,
        who: &mut Contender<'_>,
    ) -> Result<Option<Held<'r>>, RingError> {
        who.attempts += 1;
        who.state.set(WorkerState::Acquiring);
        let Some(left) = block_on(ring, who.seat.left, who)? else {
            return Ok(None);
        };
        who.state.set(WorkerState::HoldingLeft);
        trace!(worker = who.seat.worker, index = left.index(), "holding left");

        if !self.handoff_delay.is_zero() && !who.pause(self.handoff_delay) {
            left.release()?;
            return Ok(None);
        }
        let Some(right) = block_on(ring, who.seat.right, who)? else {
            left.release()?;
            return Ok(None);
        };
        who.state.set(WorkerState::HoldingBoth);
        Ok(Some(Held { left, right }))
    }
}

fn block_on<'r>(
    ring: &'r ResourceRing,
    index: usize,
    who: &Contender<'_>,
) -> Result<Option<ResourceGuard<'r>>, RingError> {
    loop {
        if who.stopped() {
            return Ok(None);
        }
        if let Some(guard) = ring.claim_timeout(index, who.seat.worker, who.poll_interval)? {
            // a neighbour winding down may free the slot after stop was raised
            if who.stopped() {
                guard.release()?;
                return Ok(None);
            }
            return Ok(Some(guard));
        }
    }
}
