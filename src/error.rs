//! Error types for the ring and the simulation driver.

use thiserror::Error;

use crate::sync::WorkerId;

/// Resource state violations: the ring's exclusivity contract was bypassed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("worker {worker} released resource {index} held by {holder:?}")]
    ReleaseNotHeld {
        index: usize,
        worker: WorkerId,
        holder: Option<WorkerId>,
    },

    #[error("worker {worker} acquired resource {index} it already holds")]
    ReentrantAcquire { index: usize, worker: WorkerId },
}

pub type SimulationResult<T> = Result<T, SimulationError>;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker broke the ring contract; the run was aborted.
    #[error("Worker {worker} aborted the run: {source}")]
    StateViolation {
        worker: WorkerId,
        #[source]
        source: RingError,
    },

    #[error("Worker {0} panicked")]
    WorkerPanicked(WorkerId),

    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: WorkerId,
        #[source]
        source: std::io::Error,
    },

    /// `(index, holder)` pairs still held after every worker was joined.
    #[error("Resources still held after shutdown: {0:?}")]
    ResourceLeak(Vec<(usize, WorkerId)>),
}
