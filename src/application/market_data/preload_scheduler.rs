//! Bulk preload of every (asset, interval) series.
//!
//! The first pass fans out one unretried call per task, bounded by the
//! configured concurrency. Failures are collected and re-attempted by a
//! fixed number of batched sweeps with pauses in between, which keeps the
//! first pass fast while staying inside the upstream call budget.

use super::series_cache::SeriesCache;
use crate::config::MarketDataConfig;
use crate::domain::assets::{HistoricalSeries, Interval};
use crate::domain::errors::MarketDataError;
use crate::domain::events::ProgressEvent;
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::event_bus::EventBus;
use futures::StreamExt;
use futures::stream;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A fetch that exhausted its attempts in the current preload cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailedTask {
    pub asset_id: String,
    pub interval: Interval,
}

/// Summary of one preload run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadReport {
    pub total_tasks: usize,
    pub fetched: usize,
    pub already_cached: usize,
    pub failed: usize,
    pub sweeps_run: usize,
    pub completed_intervals: Vec<Interval>,
    pub cancelled: bool,
}

impl PreloadReport {
    /// Ran to the end with every series cached
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failed == 0
    }
}

/// Tracks per-interval success across assets and decides when a progress
/// notification is due. Each notification fires at most once per run.
#[derive(Debug)]
pub struct CompletionTracker {
    total_assets: usize,
    primary: Interval,
    intervals: Vec<Interval>,
    succeeded: HashMap<Interval, HashSet<String>>,
    completed: BTreeSet<Interval>,
    ready_assets: HashSet<String>,
    finished: bool,
}

impl CompletionTracker {
    pub fn new(total_assets: usize, intervals: &[Interval], primary: Interval) -> Self {
        Self {
            total_assets,
            primary,
            intervals: intervals.to_vec(),
            succeeded: HashMap::new(),
            completed: BTreeSet::new(),
            ready_assets: HashSet::new(),
            finished: false,
        }
    }

    /// Record a cached series and return the notifications it triggers
    pub fn record_success(&mut self, asset_id: &str, interval: Interval) -> Vec<ProgressEvent> {
        let mut events = Vec::new();

        if interval == self.primary && self.ready_assets.insert(asset_id.to_string()) {
            events.push(ProgressEvent::AssetReady {
                asset_id: asset_id.to_string(),
                success: true,
            });
        }

        let done = self.succeeded.entry(interval).or_default();
        done.insert(asset_id.to_string());
        if done.len() >= self.total_assets && self.completed.insert(interval) {
            events.push(ProgressEvent::IntervalComplete {
                interval,
                success: true,
            });
        }

        events
    }

    /// Failure notifications for every asset and interval that never made it.
    /// Returns nothing on the second call.
    pub fn finish(&mut self, assets: &[String]) -> Vec<ProgressEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if self.intervals.contains(&self.primary) {
            for asset_id in assets {
                if !self.ready_assets.contains(asset_id) {
                    events.push(ProgressEvent::AssetReady {
                        asset_id: asset_id.clone(),
                        success: false,
                    });
                }
            }
        }
        for interval in &self.intervals {
            if !self.completed.contains(interval) {
                events.push(ProgressEvent::IntervalComplete {
                    interval: *interval,
                    success: false,
                });
            }
        }
        events
    }

    pub fn is_complete(&self, interval: Interval) -> bool {
        self.completed.contains(&interval)
    }

    pub fn completed_intervals(&self) -> Vec<Interval> {
        self.completed.iter().copied().collect()
    }
}

/// Timing knobs for the scheduler
#[derive(Debug, Clone)]
pub struct PreloadSettings {
    pub intervals: Vec<Interval>,
    pub primary: Interval,
    pub concurrency: usize,
    pub retry_sweeps: usize,
    pub sweep_batch_size: usize,
    pub sweep_batch_delay: Duration,
    pub sweep_delay: Duration,
}

impl PreloadSettings {
    pub fn from_config(config: &MarketDataConfig) -> Self {
        Self {
            intervals: config.intervals.clone(),
            primary: config.primary_interval(),
            concurrency: config.preload_concurrency.max(1),
            retry_sweeps: config.retry_sweeps,
            sweep_batch_size: config.sweep_batch_size.max(1),
            sweep_batch_delay: config.sweep_batch_delay,
            sweep_delay: config.sweep_delay,
        }
    }
}

pub struct BulkPreloadScheduler {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<SeriesCache>,
    events: EventBus<ProgressEvent>,
    settings: PreloadSettings,
    failed: Mutex<BTreeSet<FailedTask>>,
}

impl BulkPreloadScheduler {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        cache: Arc<SeriesCache>,
        events: EventBus<ProgressEvent>,
        settings: PreloadSettings,
    ) -> Self {
        Self {
            provider,
            cache,
            events,
            settings,
            failed: Mutex::new(BTreeSet::new()),
        }
    }

    fn failed_set(&self) -> std::sync::MutexGuard<'_, BTreeSet<FailedTask>> {
        match self.failed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Tasks that are still failed after the last run's sweeps
    pub fn failed_count(&self) -> usize {
        self.failed_set().len()
    }

    pub fn failed_tasks(&self) -> Vec<FailedTask> {
        self.failed_set().iter().cloned().collect()
    }

    pub fn clear_failures(&self) {
        self.failed_set().clear();
    }

    /// Forget a failure that a lazy load has since fixed
    pub fn resolve_failure(&self, asset_id: &str, interval: Interval) {
        self.failed_set().remove(&FailedTask {
            asset_id: asset_id.to_string(),
            interval,
        });
    }

    /// Primary interval first so assets become usable as early as possible
    fn ordered_intervals(&self) -> Vec<Interval> {
        let mut intervals: Vec<Interval> = self.settings.intervals.clone();
        intervals.sort_by_key(|i| (*i != self.settings.primary, *i));
        intervals.dedup();
        intervals
    }

    fn publish_all(&self, events: Vec<ProgressEvent>) {
        for event in &events {
            self.events.publish(event);
        }
    }

    fn record_success(
        &self,
        tracker: &mut CompletionTracker,
        task: &FailedTask,
        series: HistoricalSeries,
    ) {
        self.cache.put_series(&task.asset_id, task.interval, series);
        self.failed_set().remove(task);
        let events = tracker.record_success(&task.asset_id, task.interval);
        self.publish_all(events);
    }

    /// Populate the cache for every asset in `asset_ids` across all configured
    /// intervals. Individual failures never abort the run; they are left in
    /// the failed set and surfaced through [`Self::failed_count`].
    ///
    /// If `cancel` fires, remaining work is abandoned. Every series written
    /// before that point is complete.
    pub async fn run(&self, asset_ids: &[String], cancel: &CancellationToken) -> PreloadReport {
        // Completion is counted per distinct id
        let mut seen = HashSet::new();
        let unique_ids: Vec<String> = asset_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let asset_ids = unique_ids.as_slice();

        let intervals = self.ordered_intervals();
        let mut report = PreloadReport {
            total_tasks: asset_ids.len() * intervals.len(),
            ..PreloadReport::default()
        };
        self.clear_failures();

        if asset_ids.is_empty() || intervals.is_empty() {
            warn!("BulkPreloadScheduler: Nothing to preload (no assets or intervals)");
            return report;
        }

        info!(
            "BulkPreloadScheduler: Preloading {} series ({} assets x {} intervals, concurrency {})",
            report.total_tasks,
            asset_ids.len(),
            intervals.len(),
            self.settings.concurrency
        );

        let mut tracker =
            CompletionTracker::new(asset_ids.len(), &intervals, self.settings.primary);

        let mut pending = Vec::with_capacity(report.total_tasks);
        for interval in &intervals {
            for asset_id in asset_ids {
                let task = FailedTask {
                    asset_id: asset_id.clone(),
                    interval: *interval,
                };
                if self.cache.has_series(&task.asset_id, task.interval) {
                    report.already_cached += 1;
                    let events = tracker.record_success(&task.asset_id, task.interval);
                    self.publish_all(events);
                } else {
                    pending.push(task);
                }
            }
        }

        // First pass: bounded fan-out, one call per task
        let provider = &self.provider;
        let mut results = stream::iter(pending)
            .map(|task| async move {
                let result = provider
                    .fetch_series_once(&task.asset_id, task.interval)
                    .await;
                (task, result)
            })
            .buffer_unordered(self.settings.concurrency);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = results.next() => next,
            };
            let Some((task, result)) = next else { break };
            match result {
                Ok(series) => {
                    report.fetched += 1;
                    self.record_success(&mut tracker, &task, series);
                }
                Err(e) => {
                    debug!(
                        "BulkPreloadScheduler: {} {} failed on first pass: {}",
                        task.asset_id, task.interval, e
                    );
                    self.failed_set().insert(task);
                }
            }
        }
        drop(results);

        if !report.cancelled {
            report.cancelled = !self.run_sweeps(&mut tracker, &mut report, cancel).await;
        }

        report.failed = self.failed_count();
        report.completed_intervals = tracker.completed_intervals();

        if report.cancelled {
            warn!(
                "BulkPreloadScheduler: Preload cancelled ({} fetched, {} still failed)",
                report.fetched, report.failed
            );
            return report;
        }

        self.publish_all(tracker.finish(asset_ids));

        if report.failed > 0 {
            warn!(
                "BulkPreloadScheduler: Preload finished with {} permanently failed series out of {}",
                report.failed, report.total_tasks
            );
        } else {
            info!(
                "BulkPreloadScheduler: Preload complete ({} fetched, {} already cached)",
                report.fetched, report.already_cached
            );
        }
        report
    }

    /// Returns false if cancelled
    async fn run_sweeps(
        &self,
        tracker: &mut CompletionTracker,
        report: &mut PreloadReport,
        cancel: &CancellationToken,
    ) -> bool {
        for sweep in 1..=self.settings.retry_sweeps {
            let pending = self.failed_tasks();
            if pending.is_empty() {
                break;
            }

            info!(
                "BulkPreloadScheduler: Retry sweep {}/{} over {} failed series",
                sweep,
                self.settings.retry_sweeps,
                pending.len()
            );
            if !pause(self.settings.sweep_delay, cancel).await {
                return false;
            }
            report.sweeps_run += 1;

            for (idx, batch) in pending.chunks(self.settings.sweep_batch_size).enumerate() {
                if idx > 0 && !pause(self.settings.sweep_batch_delay, cancel).await {
                    return false;
                }

                let attempts = batch.iter().map(|task| async move {
                    let result = self
                        .provider
                        .fetch_series_once(&task.asset_id, task.interval)
                        .await;
                    (task, result)
                });

                let outcomes = tokio::select! {
                    _ = cancel.cancelled() => return false,
                    outcomes = futures::future::join_all(attempts) => outcomes,
                };

                for (task, result) in outcomes {
                    match result {
                        Ok(series) => {
                            report.fetched += 1;
                            self.record_success(tracker, task, series);
                        }
                        Err(e) => debug!(
                            "BulkPreloadScheduler: {} {} still failing in sweep {}: {}",
                            task.asset_id, task.interval, sweep, e
                        ),
                    }
                }
            }
        }
        true
    }
}

/// Sleep unless cancelled first. Returns false if cancelled.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
