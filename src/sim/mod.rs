pub mod config;
pub mod driver;
pub mod report;
pub mod watchdog;
pub mod worker;

pub use config::SimulationConfig;
pub use driver::Driver;
pub use report::{SimulationReport, StopReason};
