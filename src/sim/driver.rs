use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Instant,
};

use tracing::{info, warn};

use super::{
    config::SimulationConfig,
    report::{SimulationReport, StopReason},
    watchdog::Watchdog,
    worker::{StartGate, Worker, WorkerStats},
};
use crate::error::{SimulationError, SimulationResult};
use crate::sync::{ring::ResourceRing, Seat, WorkerId, WorkerState};

/// Spawns one worker per ring slot, watches them, shuts them down and reports.
pub struct Driver {
    config: SimulationConfig,
}

impl Driver {
    pub fn new(config: SimulationConfig) -> SimulationResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Runs until every worker finished its cycles, the time budget is spent, or
    /// the watchdog declares deadlock. Workers are always joined and the ring
    /// checked all-free before a report is returned.
    pub fn run(&self) -> SimulationResult<SimulationReport> {
        let config = &self.config;
        let n = config.ring_size;
        let ring = ResourceRing::new(n);
        let strategy = config.build_strategy();
        let stats: Vec<WorkerStats> = (0..n).map(|_| WorkerStats::default()).collect();
        let stop = AtomicBool::new(false);
        let gate = config.synchronized_start.then(StartGate::new);
        info!(ring_size = n, strategy = %config.strategy, cycles = ?config.cycles_per_worker, "starting run");

        let (outcome, wall_time, failure) = thread::scope(|s| {
            let mut handles = Vec::with_capacity(n);
            let mut failure = None;
            for (id, stats) in stats.iter().enumerate() {
                let worker = Worker::new(id, &ring, strategy.as_ref(), stats, &stop, config);
                let gate = gate.as_ref();
                match thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(s, move || worker.run(gate))
                {
                    Ok(handle) => handles.push(handle),
                    Err(source) => {
                        failure = Some(SimulationError::Spawn { worker: id, source });
                        stop.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }

            let started = Instant::now();
            if let Some(gate) = &gate {
                gate.open();
            }
            let outcome = match failure {
                None => self.watch(&ring, &stats, &stop, started),
                Some(_) => (StopReason::CyclesCompleted, None),
            };
            stop.store(true, Ordering::SeqCst);

            for (id, handle) in handles.into_iter().enumerate() {
                let err = match handle.join() {
                    Ok(Ok(_)) => continue,
                    Ok(Err(source)) => SimulationError::StateViolation { worker: id, source },
                    Err(_) => SimulationError::WorkerPanicked(id),
                };
                if failure.is_none() {
                    failure = Some(err);
                }
            }
            (outcome, started.elapsed(), failure)
        });

        if let Some(err) = failure {
            return Err(err);
        }
        let leaked = ring.held();
        if !leaked.is_empty() {
            return Err(SimulationError::ResourceLeak(leaked));
        }

        let (stop_reason, deadlock_cycle) = outcome;
        let load = |f: fn(&WorkerStats) -> u64| stats.iter().map(f).collect::<Vec<_>>();
        let report = SimulationReport {
            strategy: strategy.kind(),
            ring_size: n,
            completed_cycles: load(|s| s.completed.load(Ordering::SeqCst)),
            failed_attempts: load(|s| s.failed_attempts.load(Ordering::SeqCst)),
            max_attempts: load(|s| s.max_attempts.load(Ordering::SeqCst)),
            starvation_warnings: load(|s| s.starvation_warnings.load(Ordering::SeqCst))
                .iter()
                .sum(),
            deadlock_detected: stop_reason == StopReason::Deadlock,
            deadlock_cycle,
            stop_reason,
            wall_time,
        };
        info!(
            reason = ?report.stop_reason,
            deadlock = report.deadlock_detected,
            cycles = report.total_cycles(),
            wall_ms = report.wall_time.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    fn watch(
        &self,
        ring: &ResourceRing,
        stats: &[WorkerStats],
        stop: &AtomicBool,
        started: Instant,
    ) -> (StopReason, Option<Vec<WorkerId>>) {
        let config = &self.config;
        let seats: Vec<Seat> = (0..stats.len()).map(|w| Seat::new(w, ring.len())).collect();
        let mut dog = Watchdog::new(config.stall_timeout, started);
        loop {
            thread::sleep(config.poll_interval);
            let states: Vec<WorkerState> = stats.iter().map(|s| s.state.get()).collect();
            // also reached when a failing worker raised stop and everyone wound down
            if stop.load(Ordering::SeqCst) || states.iter().all(|s| *s == WorkerState::Finished) {
                return (StopReason::CyclesCompleted, None);
            }
            let now = Instant::now();
            if config
                .max_duration
                .is_some_and(|budget| now.duration_since(started) >= budget)
            {
                return (StopReason::TimeBudget, None);
            }
            let total = stats.iter().map(|s| s.completed.load(Ordering::SeqCst)).sum();
            if let Some(cycle) = dog.check(now, total, &seats, &states, &ring.snapshot()) {
                warn!(?cycle, stall_timeout = ?config.stall_timeout, "deadlock detected");
                return (StopReason::Deadlock, Some(cycle));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::SimulationError;
    use crate::sim::{config::SimulationConfig, driver::Driver, report::StopReason};
    use crate::sync::StrategyKind;
    use std::time::Duration;

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = SimulationConfig::new(1, StrategyKind::TryBackoff);
        assert!(matches!(
            Driver::new(config),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn time_budget_ends_unbounded_run() {
        let config = SimulationConfig::new(4, StrategyKind::TryBackoff)
            .unbounded()
            .with_work(Duration::from_micros(200), Duration::from_micros(200))
            .with_backoff(Duration::from_micros(100), Duration::from_millis(1))
            .with_max_duration(Some(Duration::from_millis(200)))
            .with_seed(11);
        let report = Driver::new(config).unwrap().run().unwrap();
        assert_eq!(report.stop_reason, StopReason::TimeBudget);
        assert!(!report.deadlock_detected);
        assert!(report.total_cycles() > 0);
        assert!(report.wall_time >= Duration::from_millis(200));
    }

    #[test]
    fn blocking_run_always_shuts_down_clean() {
        // unsynchronized and no handoff delay: deadlock is possible, not forced
        let config = SimulationConfig::new(2, StrategyKind::BlockingOrdered)
            .with_cycles(1)
            .with_synchronized_start(false)
            .with_handoff_delay(Duration::ZERO)
            .with_work(Duration::ZERO, Duration::ZERO)
            .with_stall_timeout(Duration::from_secs(2));
        let report = Driver::new(config).unwrap().run().unwrap();
        assert!(report.deadlock_detected || report.all_completed(1));
    }
}
