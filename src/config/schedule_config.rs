//! Retry, preload and polling timing configuration.
//!
//! The upstream free tier allows roughly 10-15 calls per minute, so the
//! defaults favor long retry delays over aggressive fan-out.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Timing and budget knobs for the fetch machinery
#[derive(Debug, Clone)]
pub struct ScheduleEnvConfig {
    /// Total attempts per call, first attempt included
    pub max_retries: usize,
    /// Delay before retry N; the last value repeats once exhausted
    pub retry_delays: Vec<Duration>,
    pub preload_concurrency: usize,
    pub retry_sweeps: usize,
    pub sweep_batch_size: usize,
    pub sweep_batch_delay: Duration,
    pub sweep_delay: Duration,
    pub poll_interval: Duration,
    pub poll_initial_delay: Duration,
    pub poll_failure_threshold: u32,
    pub poll_stop_grace: Duration,
}

impl Default for ScheduleEnvConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_delays: vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(30),
            ],
            preload_concurrency: 4,
            retry_sweeps: 3,
            sweep_batch_size: 3,
            sweep_batch_delay: Duration::from_secs(5),
            sweep_delay: Duration::from_secs(15),
            poll_interval: Duration::from_secs(5),
            poll_initial_delay: Duration::from_secs(30),
            poll_failure_threshold: 3,
            poll_stop_grace: Duration::from_secs(5),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {}: {}", name, v)),
        Err(_) => Ok(default),
    }
}

fn parse_secs(name: &str, default: Duration) -> Result<Duration> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}

/// Parses "10,20,30" into a delay schedule in seconds
pub fn parse_delay_schedule(raw: &str) -> Result<Vec<Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("Invalid retry delay: {}", s))
        })
        .collect()
}

impl ScheduleEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let retry_delays = match env::var("MARKET_RETRY_DELAYS_SECS") {
            Ok(raw) => parse_delay_schedule(&raw)?,
            Err(_) => defaults.retry_delays.clone(),
        };

        let config = Self {
            max_retries: parse_var("MARKET_MAX_RETRIES", defaults.max_retries)?,
            retry_delays,
            preload_concurrency: parse_var(
                "MARKET_PRELOAD_CONCURRENCY",
                defaults.preload_concurrency,
            )?,
            retry_sweeps: parse_var("MARKET_RETRY_SWEEPS", defaults.retry_sweeps)?,
            sweep_batch_size: parse_var("MARKET_SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?,
            sweep_batch_delay: parse_secs(
                "MARKET_SWEEP_BATCH_DELAY_SECS",
                defaults.sweep_batch_delay,
            )?,
            sweep_delay: parse_secs("MARKET_SWEEP_DELAY_SECS", defaults.sweep_delay)?,
            poll_interval: parse_secs("MARKET_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            poll_initial_delay: parse_secs(
                "MARKET_POLL_INITIAL_DELAY_SECS",
                defaults.poll_initial_delay,
            )?,
            poll_failure_threshold: parse_var(
                "MARKET_POLL_FAILURE_THRESHOLD",
                defaults.poll_failure_threshold,
            )?,
            poll_stop_grace: defaults.poll_stop_grace,
        };

        if config.max_retries == 0 {
            anyhow::bail!("MARKET_MAX_RETRIES must be at least 1");
        }
        if config.preload_concurrency == 0 || config.sweep_batch_size == 0 {
            anyhow::bail!("MARKET_PRELOAD_CONCURRENCY and MARKET_SWEEP_BATCH_SIZE must be positive");
        }
        if config.poll_interval.is_zero() {
            anyhow::bail!("MARKET_POLL_INTERVAL_SECS must be positive");
        }

        Ok(config)
    }
}
