use std::{fmt, time::Duration};

use serde::Serialize;

use crate::sync::{StrategyKind, WorkerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// Every worker ran its configured cycles.
    CyclesCompleted,
    TimeBudget,
    /// The watchdog saw no progress while every worker was blocked.
    Deadlock,
}

/// Outcome of one run. Built once at shutdown, never mutated after.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub strategy: StrategyKind,
    pub ring_size: usize,
    /// Indexed by worker id.
    pub completed_cycles: Vec<u64>,
    /// Attempts that ended in a rollback, per worker.
    pub failed_attempts: Vec<u64>,
    /// Most attempts a single acquisition took, per worker.
    pub max_attempts: Vec<u64>,
    pub starvation_warnings: u64,
    pub deadlock_detected: bool,
    /// Wait-for cycle seen when the watchdog fired, if it could be captured.
    pub deadlock_cycle: Option<Vec<WorkerId>>,
    pub stop_reason: StopReason,
    pub wall_time: Duration,
}

impl SimulationReport {
    pub fn total_cycles(&self) -> u64 {
        self.completed_cycles.iter().sum()
    }

    pub fn all_completed(&self, cycles: u64) -> bool {
        self.completed_cycles.iter().all(|&c| c >= cycles)
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} x{} stopped ({:?}) after {:.3}s, {} cycles",
            self.strategy,
            self.ring_size,
            self.stop_reason,
            self.wall_time.as_secs_f64(),
            self.total_cycles()
        )?;
        for (w, done) in self.completed_cycles.iter().enumerate() {
            writeln!(
                f,
                "  [P{w}] cycles={done} failed_attempts={} max_attempts={}",
                self.failed_attempts[w], self.max_attempts[w]
            )?;
        }
        if self.deadlock_detected {
            write!(f, "  deadlock detected")?;
            if let Some(cycle) = &self.deadlock_cycle {
                write!(f, ", wait-for cycle {cycle:?}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
