use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ring::{ResourceGuard, ResourceRing},
    AcquisitionStrategy, Contender, Held, StrategyKind, WorkerState,
};
use crate::error::RingError;

/// Bounds of the random delay between failed attempts, inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffRange {
    pub min: Duration,
    pub max: Duration,
}

impl BackoffRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

impl Default for BackoffRange {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_millis(10))
    }
}

/// Non-blocking claims of left and right; on any failure roll back what was
/// actually claimed and retry after a random backoff.
///
/// Never blocks while holding a resource, so the ring cannot deadlock. A worker
/// can still lose every race, the random backoff only makes that unlikely.
pub struct TryBackoff {
    backoff: BackoffRange,
    starvation_threshold: Option<u64>,
}

impl TryBackoff {
    pub fn new(backoff: BackoffRange, starvation_threshold: Option<u64>) -> Self {
        Self {
            backoff,
            starvation_threshold,
        }
    }
}

/// One try at both resources. Never outlives its retry cycle.
struct AcquisitionAttempt<'r> {
    left: Option<ResourceGuard<'r>>,
    right: Option<ResourceGuard<'r>>,
    attempt_count: u64,
}

impl<'r> AcquisitionAttempt<'r> {
    fn make(ring: &'r ResourceRing, who: &Contender<'_>) -> Self {
        let left = ring.try_claim(who.seat.left, who.seat.worker);
        let right = ring.try_claim(who.seat.right, who.seat.worker);
        Self {
            left,
            right,
            attempt_count: who.attempts,
        }
    }

    fn left_acquired(&self) -> bool {
        self.left.is_some()
    }

    fn right_acquired(&self) -> bool {
        self.right.is_some()
    }

    /// Both held, or the attempt back to roll back.
    fn into_held(self) -> Result<Held<'r>, Self> {
        match self {
            AcquisitionAttempt {
                left: Some(left),
                right: Some(right),
                ..
            } => Ok(Held { left, right }),
            partial => Err(partial),
        }
    }

    /// Releases only what was actually claimed, right before left.
    fn rollback(self) -> Result<(), RingError> {
        if let Some(right) = self.right {
            right.release()?;
        }
        if let Some(left) = self.left {
            left.release()?;
        }
        Ok(())
    }
}

impl AcquisitionStrategy for TryBackoff {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TryBackoff
    }

    fn acquire<'r>(
        &self,
        ring: &'r ResourceRing,
        who: &mut Contender<'_>,
    ) -> Result<Option<Held<'r>>, RingError> {
        loop {
            if who.stopped() {
                return Ok(None);
            }
            who.attempts += 1;
            who.state.set(WorkerState::Acquiring);

            let attempt = AcquisitionAttempt::make(ring, who);
            let (left_ok, right_ok) = (attempt.left_acquired(), attempt.right_acquired());
            let attempt_count = attempt.attempt_count;
            match attempt.into_held() {
                Ok(held) => {
                    who.state.set(WorkerState::HoldingBoth);
                    return Ok(Some(held));
                }
                Err(partial) => partial.rollback()?,
            }
            who.state.set(WorkerState::Idle);
            debug!(
                worker = who.seat.worker,
                attempt = attempt_count,
                left_ok,
                right_ok,
                "attempt failed, backing off"
            );

            if let Some(threshold) = self.starvation_threshold {
                if attempt_count > threshold && !who.starving {
                    who.starving = true;
                    warn!(
                        worker = who.seat.worker,
                        attempts = attempt_count,
                        threshold,
                        "worker may be starving"
                    );
                }
            }

            let delay = self.backoff.sample(&mut *who.rng);
            if !who.pause(delay) {
                return Ok(None);
            }
        }
    }
}
