use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationResult};
use crate::sync::{
    blocking_ordered::BlockingOrdered,
    try_backoff::{BackoffRange, TryBackoff},
    AcquisitionStrategy, StrategyKind,
};

/// Everything a run needs. Defaults mirror a five-seat table that eats for a
/// few milliseconds, thinks for a few more and runs for ten seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub ring_size: usize,
    pub strategy: StrategyKind,
    /// `None` runs until the time budget or the watchdog ends the run.
    pub cycles_per_worker: Option<u64>,
    pub stall_timeout: Duration,
    pub backoff_range: BackoffRange,
    /// Time spent in the critical section per cycle.
    pub work_duration: Duration,
    /// Time spent idle between cycles, holding nothing.
    pub idle_duration: Duration,
    /// Pause between taking left and reaching for right (blocking only).
    pub handoff_delay: Duration,
    pub max_duration: Option<Duration>,
    /// Hold every worker at a barrier until all are spawned.
    pub synchronized_start: bool,
    /// Failed attempts in one acquisition before a starvation warning.
    pub starvation_threshold: Option<u64>,
    /// Seeds the per-worker backoff RNG; entropy when `None`.
    pub seed: Option<u64>,
    /// Watchdog sampling period and the slice blocked waits are cut into.
    pub poll_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ring_size: 5,
            strategy: StrategyKind::TryBackoff,
            cycles_per_worker: None,
            stall_timeout: Duration::from_secs(1),
            backoff_range: BackoffRange::default(),
            work_duration: Duration::from_millis(2),
            idle_duration: Duration::from_millis(1),
            handoff_delay: Duration::from_millis(2),
            max_duration: Some(Duration::from_secs(10)),
            synchronized_start: true,
            starvation_threshold: Some(1_000),
            seed: None,
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl SimulationConfig {
    pub fn new(ring_size: usize, strategy: StrategyKind) -> Self {
        Self {
            ring_size,
            strategy,
            ..Self::default()
        }
    }

    pub fn with_cycles(mut self, cycles: u64) -> Self {
        self.cycles_per_worker = Some(cycles);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.cycles_per_worker = None;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_range = BackoffRange::new(min, max);
        self
    }

    pub fn with_work(mut self, work: Duration, idle: Duration) -> Self {
        self.work_duration = work;
        self.idle_duration = idle;
        self
    }

    pub fn with_handoff_delay(mut self, delay: Duration) -> Self {
        self.handoff_delay = delay;
        self
    }

    pub fn with_max_duration(mut self, budget: Option<Duration>) -> Self {
        self.max_duration = budget;
        self
    }

    pub fn with_synchronized_start(mut self, on: bool) -> Self {
        self.synchronized_start = on;
        self
    }

    pub fn with_starvation_threshold(mut self, threshold: Option<u64>) -> Self {
        self.starvation_threshold = threshold;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn validate(&self) -> SimulationResult<()> {
        let invalid = |msg: String| Err(SimulationError::InvalidConfig(msg));
        if self.ring_size < 2 {
            return invalid(format!("ring_size must be >= 2, got {}", self.ring_size));
        }
        if self.cycles_per_worker.is_none() && self.max_duration.is_none() {
            return invalid("run needs cycles_per_worker or max_duration".into());
        }
        if self.backoff_range.min > self.backoff_range.max {
            return invalid(format!(
                "backoff_range min {:?} exceeds max {:?}",
                self.backoff_range.min, self.backoff_range.max
            ));
        }
        if self.stall_timeout.is_zero() {
            return invalid("stall_timeout must be non-zero".into());
        }
        if self.poll_interval.is_zero() {
            return invalid("poll_interval must be non-zero".into());
        }
        Ok(())
    }

    pub fn build_strategy(&self) -> Box<dyn AcquisitionStrategy> {
        match self.strategy {
            StrategyKind::BlockingOrdered => Box::new(BlockingOrdered::new(self.handoff_delay)),
            StrategyKind::TryBackoff => Box::new(TryBackoff::new(
                self.backoff_range,
                self.starvation_threshold,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::SimulationError;
    use crate::sim::config::SimulationConfig;
    use crate::sync::StrategyKind;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = SimulationConfig::default();
        assert_eq!(config.ring_size, 5);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_configs() {
        let bad = [
            SimulationConfig::new(1, StrategyKind::TryBackoff),
            SimulationConfig::default().unbounded().with_max_duration(None),
            SimulationConfig::default()
                .with_backoff(Duration::from_millis(5), Duration::from_millis(1)),
            SimulationConfig::default().with_stall_timeout(Duration::ZERO),
            SimulationConfig::default().with_poll_interval(Duration::ZERO),
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(SimulationError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn builds_matching_strategy() {
        for kind in [StrategyKind::BlockingOrdered, StrategyKind::TryBackoff] {
            assert_eq!(SimulationConfig::new(3, kind).build_strategy().kind(), kind);
        }
    }

    #[test]
    fn deserializes_partial_config() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"ring_size": 3, "strategy": "blocking"}"#).unwrap();
        assert_eq!(config.ring_size, 3);
        assert_eq!(config.strategy, StrategyKind::BlockingOrdered);
        assert_eq!(config.stall_timeout, SimulationConfig::default().stall_timeout);
    }
}
