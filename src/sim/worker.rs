use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Condvar, Mutex, PoisonError,
};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, error};

use super::config::SimulationConfig;
use crate::error::RingError;
use crate::sync::{
    ring::ResourceRing, sleep_unless, AcquisitionStrategy, Contender, Seat, StateCell,
    WorkerState,
};

/// Progress a worker publishes while running. Only the owning worker writes.
#[derive(Default)]
pub struct WorkerStats {
    pub state: StateCell,
    pub completed: AtomicU64,
    pub failed_attempts: AtomicU64,
    pub max_attempts: AtomicU64,
    pub starvation_warnings: AtomicU64,
}

impl WorkerStats {
    /// `acquired` is false when a stop cut the acquisition short, so every
    /// attempt it made failed.
    fn record_acquisition(&self, attempts: u64, starving: bool, acquired: bool) {
        let failed = if acquired {
            attempts.saturating_sub(1)
        } else {
            attempts
        };
        self.failed_attempts.fetch_add(failed, Ordering::SeqCst);
        self.max_attempts.fetch_max(attempts, Ordering::SeqCst);
        if starving {
            self.starvation_warnings.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One-shot latch holding every worker until the driver has spawned them all,
/// so their first attempts collide.
#[derive(Default)]
pub struct StartGate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl StartGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        let _open = self
            .cv
            .wait_while(open, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// One philosopher: acquire, work, release, idle, until told to stop or out of cycles.
pub struct Worker<'a> {
    seat: Seat,
    ring: &'a ResourceRing,
    strategy: &'a dyn AcquisitionStrategy,
    stats: &'a WorkerStats,
    stop: &'a AtomicBool,
    config: &'a SimulationConfig,
    rng: StdRng,
}

impl<'a> Worker<'a> {
    pub fn new(
        id: usize,
        ring: &'a ResourceRing,
        strategy: &'a dyn AcquisitionStrategy,
        stats: &'a WorkerStats,
        stop: &'a AtomicBool,
        config: &'a SimulationConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };
        Self {
            seat: Seat::new(id, ring.len()),
            ring,
            strategy,
            stats,
            stop,
            config,
            rng,
        }
    }

    /// Runs the loop to completion. On a ring violation the stop signal is raised
    /// for everyone, since the run can no longer be trusted.
    pub fn run(mut self, start: Option<&StartGate>) -> Result<u64, RingError> {
        if let Some(gate) = start {
            gate.wait();
        }
        let result = self.cycles();
        self.stats.state.set(WorkerState::Finished);
        if let Err(e) = &result {
            error!(worker = self.seat.worker, %e, "resource state violation");
            self.stop.store(true, Ordering::SeqCst);
        }
        result
    }

    fn cycles(&mut self) -> Result<u64, RingError> {
        let mut done = 0;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            if self.config.cycles_per_worker.is_some_and(|n| done >= n) {
                break;
            }

            let mut who = Contender {
                seat: self.seat,
                state: &self.stats.state,
                stop: self.stop,
                rng: &mut self.rng,
                poll_interval: self.config.poll_interval,
                attempts: 0,
                starving: false,
            };
            let acquired = self.strategy.acquire(self.ring, &mut who)?;
            let (attempts, starving) = (who.attempts, who.starving);
            self.stats
                .record_acquisition(attempts, starving, acquired.is_some());
            let Some(held) = acquired else {
                break;
            };
            if self.stop.load(Ordering::SeqCst) {
                // the run is over, a cycle now would outlive it
                held.release()?;
                break;
            }

            self.stats.state.set(WorkerState::Working);
            // Work is not interruptible, a stop takes effect after release
            std::thread::sleep(self.config.work_duration);
            held.release()?;
            done += 1;
            self.stats.completed.fetch_add(1, Ordering::SeqCst);
            debug!(worker = self.seat.worker, cycle = done, attempts, "cycle done");

            self.stats.state.set(WorkerState::Idle);
            if !sleep_unless(
                self.stop,
                self.config.idle_duration,
                self.config.poll_interval,
            ) {
                break;
            }
        }
        Ok(done)
    }
}
