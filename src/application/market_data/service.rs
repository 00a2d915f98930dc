//! Market data façade.
//!
//! Provides the query surface consumed by the presentation layer:
//! - Cache-first top-assets snapshot with single-flight cold start
//! - Lazy per-request historical series with cache population
//! - Bulk preload, cache invalidation and failure accounting
//! - Progress notifications via subscription handles
//!
//! Nothing here returns an error to the caller. Failures are logged and
//! surface as empty lists, empty series or the failed-task count.

use super::preload_scheduler::{BulkPreloadScheduler, PreloadReport, PreloadSettings};
use super::retry_policy::{BackoffExecutor, RetryPolicy};
use super::series_cache::SeriesCache;
use crate::config::MarketDataConfig;
use crate::domain::assets::{AssetSnapshot, HistoricalSeries, Interval};
use crate::domain::errors::MarketDataError;
use crate::domain::events::{EventListener, ProgressEvent};
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::event_bus::{EventBus, Subscription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct MarketDataService {
    provider: Arc<dyn MarketDataProvider>,
    cache: Arc<SeriesCache>,
    executor: BackoffExecutor,
    scheduler: BulkPreloadScheduler,
    progress: EventBus<ProgressEvent>,
    /// Guards both the re-check and the fetch-and-populate of the snapshot
    snapshot_lock: tokio::sync::Mutex<()>,
    cancel: std::sync::Mutex<CancellationToken>,
    preload_running: AtomicBool,
    top_n: usize,
    primary: Interval,
}

/// Resets the in-flight flag even if the preload future is dropped
struct PreloadGuard<'a>(&'a AtomicBool);

impl Drop for PreloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MarketDataService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: &MarketDataConfig) -> Self {
        let cache = Arc::new(SeriesCache::new());
        let progress = EventBus::new();
        let scheduler = BulkPreloadScheduler::new(
            provider.clone(),
            cache.clone(),
            progress.clone(),
            PreloadSettings::from_config(config),
        );

        Self {
            provider,
            cache,
            executor: BackoffExecutor::new("MarketData", RetryPolicy::from_config(config)),
            scheduler,
            progress,
            snapshot_lock: tokio::sync::Mutex::new(()),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            preload_running: AtomicBool::new(false),
            top_n: config.top_n,
            primary: config.primary_interval(),
        }
    }

    pub fn cache(&self) -> Arc<SeriesCache> {
        self.cache.clone()
    }

    fn token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Abort in-flight fetches, backoff sleeps and any running preload.
    /// Later calls run normally against a fresh token.
    pub fn cancel(&self) {
        let old = {
            let mut guard = match self.cancel.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        old.cancel();
        info!("MarketDataService: Cancelled in-flight work");
    }

    /// Current top assets. Served from cache when present; otherwise one
    /// retried upstream fetch, shared by every concurrent caller.
    ///
    /// An empty or failed fetch returns an empty list and leaves the cache
    /// unset so the next call tries again.
    pub async fn get_snapshot(&self) -> Vec<AssetSnapshot> {
        if self.cache.has_snapshot() {
            return self.cache.get_snapshot();
        }

        let _guard = self.snapshot_lock.lock().await;
        if self.cache.has_snapshot() {
            debug!("MarketDataService: Snapshot populated by a concurrent caller");
            return self.cache.get_snapshot();
        }

        info!("MarketDataService: Fetching top {} assets", self.top_n);
        let cancel = self.token();
        let result = self
            .executor
            .execute(&cancel, || self.provider.fetch_top_assets(self.top_n))
            .await;

        match result {
            Ok(assets) if assets.is_empty() => {
                warn!("MarketDataService: Upstream returned an empty snapshot, not caching");
                Vec::new()
            }
            Ok(assets) => {
                info!("MarketDataService: Cached snapshot of {} assets", assets.len());
                self.cache.put_snapshot(assets.clone());
                assets
            }
            Err(e) => {
                warn!("MarketDataService: Snapshot fetch failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Historical series for `asset_id` at the interval keyed by day count.
    /// A blank key means the default (shortest) interval; an unsupported key
    /// yields an empty series.
    pub async fn get_historical_series(&self, asset_id: &str, interval_key: &str) -> HistoricalSeries {
        match Interval::from_key(interval_key) {
            Some(interval) => self.get_series(asset_id, interval).await,
            None => {
                warn!(
                    "MarketDataService: Unsupported interval '{}' requested for {}",
                    interval_key, asset_id
                );
                HistoricalSeries::empty()
            }
        }
    }

    /// Typed variant of [`Self::get_historical_series`]. Returns the cached
    /// series without an upstream call when present. An empty result means
    /// "unavailable", never an error.
    pub async fn get_series(&self, asset_id: &str, interval: Interval) -> HistoricalSeries {
        if asset_id.trim().is_empty() {
            return HistoricalSeries::empty();
        }
        if let Some(series) = self.cache.get_series(asset_id, interval) {
            return series;
        }

        debug!(
            "MarketDataService: Lazy-loading {} {} from upstream",
            asset_id, interval
        );
        let cancel = self.token();
        let result = self
            .executor
            .execute(&cancel, || self.provider.fetch_series_once(asset_id, interval))
            .await;

        match result {
            Ok(series) => {
                self.cache.put_series(asset_id, interval, series.clone());
                self.scheduler.resolve_failure(asset_id, interval);
                series
            }
            Err(MarketDataError::EmptyResult) => {
                debug!(
                    "MarketDataService: No data for {} {}",
                    asset_id, interval
                );
                HistoricalSeries::empty()
            }
            Err(e) => {
                warn!(
                    "MarketDataService: Failed to load {} {}: {}",
                    asset_id, interval, e
                );
                HistoricalSeries::empty()
            }
        }
    }

    /// Pure cache lookup; never triggers a fetch
    pub fn has_historical_series(&self, asset_id: &str, interval_key: &str) -> bool {
        Interval::from_key(interval_key)
            .is_some_and(|interval| self.cache.has_series(asset_id, interval))
    }

    /// Interval to show for an asset: the requested one if cached, else the
    /// primary interval.
    pub fn resolve_display_interval(&self, asset_id: &str, requested: Interval) -> Interval {
        if self.cache.has_series(asset_id, requested) {
            requested
        } else {
            self.primary
        }
    }

    /// Preload every (asset, interval) series. Only one run may be in flight;
    /// a second concurrent call returns an empty report immediately.
    pub async fn preload_all(&self) -> PreloadReport {
        if self.preload_running.swap(true, Ordering::SeqCst) {
            warn!("MarketDataService: Preload already in progress, ignoring request");
            return PreloadReport::default();
        }
        let _running = PreloadGuard(&self.preload_running);

        let assets = self.get_snapshot().await;
        if assets.is_empty() {
            warn!("MarketDataService: No assets available, skipping preload");
            return PreloadReport::default();
        }

        let ids: Vec<String> = assets.into_iter().map(|a| a.id).collect();
        let cancel = self.token();
        self.scheduler.run(&ids, &cancel).await
    }

    /// Drop all cached data and remembered failures
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.scheduler.clear_failures();
        info!("MarketDataService: Cache cleared");
    }

    /// Clear and reload everything
    pub async fn refresh(&self) -> PreloadReport {
        self.clear_cache();
        self.preload_all().await
    }

    /// Series still missing after the last preload's retry sweeps
    pub fn get_failed_count(&self) -> usize {
        self.scheduler.failed_count()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener<ProgressEvent>>) -> Subscription<ProgressEvent> {
        self.progress.subscribe(listener)
    }

    pub fn register_progress_callback<F>(&self, callback: F) -> Subscription<ProgressEvent>
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress.subscribe(Arc::new(callback))
    }
}
