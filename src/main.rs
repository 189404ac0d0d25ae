use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dining::{Driver, SimulationConfig, StrategyKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run N philosophers around a ring of N forks and report what happened.
#[derive(Parser)]
#[command(name = "dining")]
#[command(about = "Resource arbitration simulator", long_about = None)]
struct Cli {
    /// Number of workers and resources
    #[arg(short = 'n', long, default_value_t = 5)]
    ring_size: usize,

    #[arg(short, long, value_enum, default_value_t = StrategyKind::TryBackoff)]
    strategy: StrategyKind,

    /// Cycles per worker; unbounded if omitted
    #[arg(short, long)]
    cycles: Option<u64>,

    /// Wall-clock budget in seconds, 0 for none
    #[arg(long, default_value_t = 10.0)]
    runtime_secs: f64,

    #[arg(long, default_value_t = 1000)]
    stall_timeout_ms: u64,

    #[arg(long, default_value_t = 1)]
    backoff_min_ms: u64,

    #[arg(long, default_value_t = 10)]
    backoff_max_ms: u64,

    /// Time in the critical section per cycle
    #[arg(long, default_value_t = 2)]
    work_ms: u64,

    /// Idle time between cycles
    #[arg(long, default_value_t = 1)]
    idle_ms: u64,

    /// Pause between left and right under the blocking strategy
    #[arg(long, default_value_t = 2)]
    handoff_ms: u64,

    /// Let workers start as soon as they are spawned
    #[arg(long)]
    no_sync_start: bool,

    #[arg(long)]
    starvation_threshold: Option<u64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Longest wait before a blocked worker or the watchdog looks again
    #[arg(long, default_value_t = 5)]
    poll_interval_ms: u64,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> Result<SimulationConfig> {
        let ms = Duration::from_millis;
        let budget = if self.runtime_secs > 0.0 {
            let secs = Duration::try_from_secs_f64(self.runtime_secs)
                .with_context(|| format!("invalid --runtime-secs {}", self.runtime_secs))?;
            Some(secs)
        } else {
            None
        };
        let mut config = SimulationConfig::new(self.ring_size, self.strategy)
            .with_stall_timeout(ms(self.stall_timeout_ms))
            .with_backoff(ms(self.backoff_min_ms), ms(self.backoff_max_ms))
            .with_work(ms(self.work_ms), ms(self.idle_ms))
            .with_handoff_delay(ms(self.handoff_ms))
            .with_max_duration(budget)
            .with_poll_interval(ms(self.poll_interval_ms))
            .with_synchronized_start(!self.no_sync_start);
        config.cycles_per_worker = self.cycles;
        if self.starvation_threshold.is_some() {
            config = config.with_starvation_threshold(self.starvation_threshold);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let driver = Driver::new(cli.config()?)?;
    info!(strategy = %cli.strategy, ring_size = cli.ring_size, "---- philosophers ----");

    let report = driver.run().context("simulation failed")?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
