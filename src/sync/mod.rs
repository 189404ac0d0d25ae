pub mod blocking_ordered;
pub mod ring;
pub mod try_backoff;

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::{Duration, Instant},
};

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::RingError;
use ring::{ResourceGuard, ResourceRing};

pub type WorkerId = usize;

/// How a worker gets hold of its two resources.
///
/// Implementations must either return both resources held or hold nothing:
/// 1. Partial claims are rolled back before returning, including on error.
/// 2. The stop signal in [`Contender`] is honoured while waiting, so a run can shut
///    down even when the strategy is stuck in a circular wait.
pub trait AcquisitionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// `Ok(None)` when stopped before both resources were held.
    fn acquire<'r>(
        &self,
        ring: &'r ResourceRing,
        who: &mut Contender<'_>,
    ) -> Result<Option<Held<'r>>, RingError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Left then right, both blocking. Deadlock-prone.
    #[value(name = "blocking")]
    #[serde(rename = "blocking")]
    BlockingOrdered,
    /// Try both, roll back and sleep a random interval on failure.
    #[value(name = "try-backoff")]
    TryBackoff,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::BlockingOrdered => write!(f, "blocking"),
            StrategyKind::TryBackoff => write!(f, "try-backoff"),
        }
    }
}

/// A worker's place at the ring: it contends for `left = worker` and
/// `right = (worker + 1) mod n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seat {
    pub worker: WorkerId,
    pub left: usize,
    pub right: usize,
}

impl Seat {
    pub fn new(worker: WorkerId, ring_size: usize) -> Self {
        assert!(
            worker < ring_size,
            "Expect 0-based worker {worker} < ring_size={ring_size}"
        );
        Self {
            worker,
            left: worker,
            right: (worker + 1) % ring_size,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle,
    Acquiring,
    HoldingLeft,
    HoldingBoth,
    Working,
    Finished,
}

impl WorkerState {
    /// Waiting on a resource, as opposed to thinking, eating or gone.
    pub fn is_blocked(self) -> bool {
        matches!(self, WorkerState::Acquiring | WorkerState::HoldingLeft)
    }
}

/// Worker state published for the watchdog. Only the owning worker writes it.
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Idle as u8))
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::SeqCst)
    }

    pub fn get(&self) -> WorkerState {
        match self.0.load(Ordering::SeqCst) {
            0 => WorkerState::Idle,
            1 => WorkerState::Acquiring,
            2 => WorkerState::HoldingLeft,
            3 => WorkerState::HoldingBoth,
            4 => WorkerState::Working,
            _ => WorkerState::Finished,
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-worker context handed to a strategy for one acquisition.
pub struct Contender<'a> {
    pub seat: Seat,
    pub state: &'a StateCell,
    pub stop: &'a AtomicBool,
    pub rng: &'a mut StdRng,
    /// Longest single wait before the stop signal is checked again.
    pub poll_interval: Duration,
    /// Attempts made in the current acquisition, reset by the worker each cycle.
    pub attempts: u64,
    /// Set once the current acquisition has logged a starvation warning.
    pub starving: bool,
}

impl Contender<'_> {
    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleeps for `d` in `poll_interval` slices. Returns false if stopped meanwhile.
    pub fn pause(&self, d: Duration) -> bool {
        sleep_unless(self.stop, d, self.poll_interval)
    }
}

/// Sleeps for `d` unless `stop` is raised first. Returns false if it was.
pub fn sleep_unless(stop: &AtomicBool, d: Duration, slice: Duration) -> bool {
    let deadline = Instant::now() + d;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(slice.min(deadline - now));
    }
}

/// Both resources of a seat.
pub struct Held<'r> {
    pub left: ResourceGuard<'r>,
    pub right: ResourceGuard<'r>,
}

impl Held<'_> {
    /// Releases in reverse acquisition order.
    pub fn release(self) -> Result<(), RingError> {
        let Held { left, right } = self;
        right.release()?;
        left.release()
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::{sleep_unless, Seat, StateCell, StrategyKind, WorkerState};
    use clap::ValueEnum;
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::{Duration, Instant},
    };

    #[test]
    fn seats_wrap_around() {
        assert_eq!(
            Seat::new(4, 5),
            Seat {
                worker: 4,
                left: 4,
                right: 0
            }
        );
        let s = Seat::new(1, 2);
        assert_eq!((s.left, s.right), (1, 0));
    }

    #[test]
    #[should_panic]
    fn seat_outside_ring() {
        Seat::new(5, 5);
    }

    #[test]
    fn state_cell_round_trips_every_state() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), WorkerState::Idle);
        for s in [
            WorkerState::Acquiring,
            WorkerState::HoldingLeft,
            WorkerState::HoldingBoth,
            WorkerState::Working,
            WorkerState::Finished,
            WorkerState::Idle,
        ] {
            cell.set(s);
            assert_eq!(cell.get(), s);
        }
        assert!(WorkerState::HoldingLeft.is_blocked());
        assert!(!WorkerState::Working.is_blocked());
    }

    #[test]
    fn strategy_has_one_name_everywhere() {
        for kind in [StrategyKind::BlockingOrdered, StrategyKind::TryBackoff] {
            let name = kind.to_string();
            assert_eq!(serde_json::to_value(kind).unwrap(), name.as_str());
            assert_eq!(
                serde_json::from_value::<StrategyKind>(name.as_str().into()).unwrap(),
                kind
            );
            assert_eq!(kind.to_possible_value().unwrap().get_name(), name);
            assert_eq!(StrategyKind::from_str(&name, false).unwrap(), kind);
        }
        assert!(serde_json::from_str::<StrategyKind>(r#""blocking-ordered""#).is_err());
    }

    #[test]
    fn sleep_is_cut_short_by_stop() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless(
            &stop,
            Duration::from_millis(5),
            Duration::from_millis(1)
        ));
        stop.store(true, Ordering::SeqCst);
        let start = Instant::now();
        assert!(!sleep_unless(
            &stop,
            Duration::from_secs(10),
            Duration::from_millis(1)
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
