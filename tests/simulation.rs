//! End-to-end runs of both strategies through the driver.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use dining::sync::{ring::ResourceRing, Contender, Seat, StateCell};
use dining::{Driver, SimulationConfig, StopReason, StrategyKind};
use rand::{rngs::StdRng, SeedableRng};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn blocking(ring_size: usize) -> SimulationConfig {
    SimulationConfig::new(ring_size, StrategyKind::BlockingOrdered)
        .unbounded()
        .with_handoff_delay(ms(20))
        .with_stall_timeout(ms(150))
        .with_poll_interval(ms(5))
        .with_max_duration(Some(Duration::from_secs(10)))
        .with_synchronized_start(true)
}

#[test]
fn two_seat_blocking_deadlocks_within_stall_timeout() {
    let report = Driver::new(blocking(2)).unwrap().run().unwrap();
    assert!(report.deadlock_detected);
    assert_eq!(report.stop_reason, StopReason::Deadlock);
    assert_eq!(report.deadlock_cycle, Some(vec![0, 1]));
    assert_eq!(report.completed_cycles, vec![0, 0]);
    assert!(report.wall_time < Duration::from_secs(5));
}

#[test]
fn five_seat_blocking_deadlock_is_reproducible() {
    const TRIALS: usize = 20;
    let fired = (0..TRIALS)
        .filter(|_| {
            let report = Driver::new(blocking(5)).unwrap().run().unwrap();
            if report.deadlock_detected {
                assert_eq!(report.deadlock_cycle.as_deref(), Some(&[0, 1, 2, 3, 4][..]));
            }
            report.deadlock_detected
        })
        .count();
    assert!(fired * 10 >= TRIALS * 9, "deadlock in only {fired}/{TRIALS} trials");
}

#[test]
fn try_backoff_never_deadlocks_and_everyone_eats() {
    let config = SimulationConfig::new(5, StrategyKind::TryBackoff)
        .unbounded()
        .with_stall_timeout(ms(500))
        .with_max_duration(Some(Duration::from_secs(2)))
        .with_seed(42);
    let report = Driver::new(config).unwrap().run().unwrap();
    assert!(!report.deadlock_detected);
    assert_eq!(report.stop_reason, StopReason::TimeBudget);
    assert!(
        report.all_completed(1),
        "some worker never ate: {:?}",
        report.completed_cycles
    );
}

#[test]
fn three_seats_fifty_cycles_each() {
    let config = SimulationConfig::new(3, StrategyKind::TryBackoff)
        .with_cycles(50)
        .with_work(ms(1), ms(1))
        .with_max_duration(Some(Duration::from_secs(60)));
    let report = Driver::new(config).unwrap().run().unwrap();
    assert!(!report.deadlock_detected);
    assert_eq!(report.stop_reason, StopReason::CyclesCompleted);
    assert_eq!(report.completed_cycles, vec![50, 50, 50]);
    // three seats share three forks, somebody had to back off
    assert!(report.failed_attempts.iter().sum::<u64>() > 0);
    assert!(report.max_attempts.iter().all(|&m| m >= 1));
}

#[test]
fn blocking_finishes_when_cycles_run_out_first() {
    // one cycle each, unsynchronized, no handoff: either all eat or it deadlocks,
    // and either way nothing is left held
    let config = SimulationConfig::new(5, StrategyKind::BlockingOrdered)
        .with_cycles(1)
        .with_handoff_delay(Duration::ZERO)
        .with_synchronized_start(false)
        .with_stall_timeout(ms(300));
    let report = Driver::new(config).unwrap().run().unwrap();
    if !report.deadlock_detected {
        assert_eq!(report.stop_reason, StopReason::CyclesCompleted);
        assert!(report.all_completed(1));
    }
}

#[test]
fn neighbours_never_share_a_fork() {
    const N: usize = 5;
    const CYCLES: u64 = 200;
    let config = Arc::new(
        SimulationConfig::new(N, StrategyKind::TryBackoff)
            .with_backoff(Duration::from_micros(10), Duration::from_micros(200)),
    );
    let ring = Arc::new(ResourceRing::new(N));
    let stop = Arc::new(AtomicBool::new(false));
    // one counter per fork, bumped with a split load/store by whoever holds it
    let forks = Arc::new((0..N).map(|_| AtomicI64::new(0)).collect::<Vec<_>>());

    // drive the strategy directly so the critical section can touch the forks
    let ths = (0..N)
        .map(|id| {
            let (config, ring, stop, forks) =
                (config.clone(), ring.clone(), stop.clone(), forks.clone());
            std::thread::spawn(move || {
                let strategy = config.build_strategy();
                let state = StateCell::new();
                let mut rng = StdRng::seed_from_u64(id as u64);
                for _ in 0..CYCLES {
                    let mut who = Contender {
                        seat: Seat::new(id, N),
                        state: &state,
                        stop: &stop,
                        rng: &mut rng,
                        poll_interval: ms(1),
                        attempts: 0,
                        starving: false,
                    };
                    let held = strategy.acquire(&ring, &mut who).unwrap().unwrap();
                    for f in [id, (id + 1) % N] {
                        let v = forks[f].load(Ordering::Relaxed);
                        std::thread::yield_now();
                        forks[f].store(v + 1, Ordering::Relaxed);
                    }
                    held.release().unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    ths.into_iter().for_each(|th| th.join().unwrap());

    // each fork is shared by exactly two workers
    for f in forks.iter() {
        assert_eq!(f.load(Ordering::Relaxed), 2 * CYCLES as i64);
    }
    assert!(ring.is_all_free());
}
