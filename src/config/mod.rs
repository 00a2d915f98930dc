//! Configuration module for the market-data cache.
//!
//! Settings are loaded from environment variables and split by concern:
//! the upstream API itself, and the retry / preload / polling schedule.

mod schedule_config;
mod upstream_config;

pub use schedule_config::{ScheduleEnvConfig, parse_delay_schedule};
pub use upstream_config::{DEFAULT_BASE_URL, UpstreamEnvConfig};

use crate::domain::assets::Interval;
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Static configuration handed to the service and poller at construction.
#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    // Upstream
    pub base_url: String,
    pub api_key: Option<String>,
    pub vs_currency: String,
    pub top_n: usize,
    pub request_timeout: Duration,
    pub intervals: Vec<Interval>,

    // Retry policy
    pub max_retries: usize,
    pub retry_delays: Vec<Duration>,

    // Bulk preload
    pub preload_concurrency: usize,
    pub retry_sweeps: usize,
    pub sweep_batch_size: usize,
    pub sweep_batch_delay: Duration,
    pub sweep_delay: Duration,

    // Price polling
    pub poll_interval: Duration,
    pub poll_initial_delay: Duration,
    pub poll_failure_threshold: u32,
    pub poll_stop_grace: Duration,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self::compose(
            UpstreamEnvConfig::default(),
            ScheduleEnvConfig::default(),
            Interval::all(),
        )
    }
}

impl MarketDataConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let upstream = UpstreamEnvConfig::from_env().context("Failed to load upstream config")?;
        let schedule = ScheduleEnvConfig::from_env().context("Failed to load schedule config")?;

        let intervals = match env::var("MARKET_INTERVALS") {
            Ok(raw) => parse_intervals(&raw)?,
            Err(_) => Interval::all(),
        };

        Ok(Self::compose(upstream, schedule, intervals))
    }

    fn compose(
        upstream: UpstreamEnvConfig,
        schedule: ScheduleEnvConfig,
        intervals: Vec<Interval>,
    ) -> Self {
        Self {
            base_url: upstream.base_url,
            api_key: upstream.api_key,
            vs_currency: upstream.vs_currency,
            top_n: upstream.top_n,
            request_timeout: upstream.request_timeout,
            intervals,

            max_retries: schedule.max_retries,
            retry_delays: schedule.retry_delays,

            preload_concurrency: schedule.preload_concurrency,
            retry_sweeps: schedule.retry_sweeps,
            sweep_batch_size: schedule.sweep_batch_size,
            sweep_batch_delay: schedule.sweep_batch_delay,
            sweep_delay: schedule.sweep_delay,

            poll_interval: schedule.poll_interval,
            poll_initial_delay: schedule.poll_initial_delay,
            poll_failure_threshold: schedule.poll_failure_threshold,
            poll_stop_grace: schedule.poll_stop_grace,
        }
    }

    /// Primary interval if configured, otherwise the shortest configured one.
    pub fn primary_interval(&self) -> Interval {
        if self.intervals.contains(&Interval::PRIMARY) {
            Interval::PRIMARY
        } else {
            self.intervals
                .iter()
                .min()
                .copied()
                .unwrap_or(Interval::PRIMARY)
        }
    }
}

/// Parses "1,7,30" into intervals, deduplicated, shortest first.
fn parse_intervals(raw: &str) -> Result<Vec<Interval>> {
    let mut intervals = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        let interval = Interval::from_key(key)
            .with_context(|| format!("Unsupported interval in MARKET_INTERVALS: {}", key))?;
        if !intervals.contains(&interval) {
            intervals.push(interval);
        }
    }
    if intervals.is_empty() {
        anyhow::bail!("MARKET_INTERVALS must name at least one interval");
    }
    intervals.sort();
    Ok(intervals)
}
