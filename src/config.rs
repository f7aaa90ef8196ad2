/// Command line options and validated runtime configuration
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use crate::constants::*;
use crate::error::Error;

#[derive(Parser, Debug)]
#[command(name = "cpu-udp-reporter")]
#[command(version)]
#[command(about = "Sample per-core CPU utilization and send it over UDP")]
pub struct Cli {
    /// Counter table to sample
    #[arg(long, default_value = PROC_STAT_PATH)]
    pub source: PathBuf,

    /// Datagram destination as host:port
    #[arg(short, long, default_value = DEFAULT_DESTINATION)]
    pub destination: String,

    /// Milliseconds between ticks
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Attempts at the first counter read before giving up
    #[arg(long, default_value_t = DEFAULT_STARTUP_ATTEMPTS)]
    pub startup_attempts: u32,

    /// Milliseconds between startup read attempts
    #[arg(long, default_value_t = DEFAULT_STARTUP_RETRY_MS)]
    pub startup_retry_ms: u64,

    /// Rows to allocate up front (defaults to configured CPUs plus the aggregate row)
    #[arg(long)]
    pub initial_capacity: Option<usize>,

    /// Stop after this many ticks
    #[arg(long)]
    pub max_ticks: Option<u64>,

    /// Log every payload
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Default log filter; `RUST_LOG` still takes precedence.
    pub fn log_filter(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }
}

/// Settings for one sampler run.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: PathBuf,
    pub destination: SocketAddr,
    pub interval: Duration,
    pub startup_attempts: u32,
    pub startup_retry_delay: Duration,
    pub initial_capacity: usize,
    pub max_ticks: Option<u64>,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self, Error> {
        if cli.interval_ms == 0 {
            return Err(Error::Config("--interval-ms must be greater than 0".into()));
        }
        if cli.startup_attempts == 0 {
            return Err(Error::Config("--startup-attempts must be at least 1".into()));
        }
        let destination = resolve_destination(&cli.destination)?;

        Ok(Config {
            source: cli.source.clone(),
            destination,
            interval: Duration::from_millis(cli.interval_ms),
            startup_attempts: cli.startup_attempts,
            startup_retry_delay: Duration::from_millis(cli.startup_retry_ms),
            initial_capacity: cli
                .initial_capacity
                .unwrap_or_else(default_capacity)
                .max(MIN_TABLE_CAPACITY),
            max_ticks: cli.max_ticks,
        })
    }
}

/// Resolve `host:port`, taking the first address returned.
fn resolve_destination(raw: &str) -> Result<SocketAddr, Error> {
    let mut addrs = raw
        .to_socket_addrs()
        .map_err(|err| Error::Config(format!("invalid destination '{raw}': {err}")))?;
    addrs
        .next()
        .ok_or_else(|| Error::Config(format!("destination '{raw}' resolved to no address")))
}

/// Configured processor count plus one row for the aggregate.
pub fn default_capacity() -> usize {
    // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
    let cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    let cpus = if cpus > 0 { cpus as usize } else { 1 };
    (cpus + 1).max(MIN_TABLE_CAPACITY)
}
