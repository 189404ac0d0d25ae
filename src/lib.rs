//! Dining philosophers as a resource arbitration simulator.
//!
//! N workers sit around a ring of N exclusive resources and each needs the two
//! next to it. [`sync`] holds the ring and the two ways of taking a pair:
//! blocking left-then-right, which can deadlock, and try-then-backoff, which
//! cannot. [`sim`] runs either against the same ring and watches for progress.

pub mod error;
pub mod sim;
pub mod sync;

pub use error::{RingError, SimulationError, SimulationResult};
pub use sim::{Driver, SimulationConfig, SimulationReport, StopReason};
pub use sync::StrategyKind;
