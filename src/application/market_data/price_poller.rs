use crate::config::MarketDataConfig;
use crate::domain::assets::AssetSnapshot;
use crate::domain::events::{EventListener, PriceUpdate};
use crate::domain::ports::MarketDataProvider;
use crate::infrastructure::event_bus::{EventBus, Subscription};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest accepted poll period; `tokio::time::interval` rejects zero
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub failure_threshold: u32,
    pub stop_grace: Duration,
}

impl PollerSettings {
    pub fn from_config(config: &MarketDataConfig) -> Self {
        Self {
            interval: config.poll_interval.max(MIN_POLL_INTERVAL),
            initial_delay: config.poll_initial_delay,
            failure_threshold: config.poll_failure_threshold.max(1),
            stop_grace: config.poll_stop_grace,
        }
    }
}

/// Result of a single timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fetch succeeded; number of quotes applied
    Updated(usize),
    Failed,
    /// Backoff in effect, no upstream call made
    Skipped,
}

#[derive(Debug, Default)]
struct LiveQuotes {
    prices: HashMap<String, f64>,
    changes: HashMap<String, f64>,
}

/// State shared between the poller handle and its background task
struct PollState {
    provider: Arc<dyn MarketDataProvider>,
    quotes: RwLock<LiveQuotes>,
    consecutive_failures: AtomicU32,
    events: EventBus<PriceUpdate>,
    failure_threshold: u32,
}

impl PollState {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, LiveQuotes> {
        match self.quotes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LiveQuotes> {
        match self.quotes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn tick(&self, asset_ids: &[String]) -> TickOutcome {
        let failures = self.consecutive_failures.load(Ordering::SeqCst);
        if failures >= self.failure_threshold {
            self.consecutive_failures.fetch_sub(1, Ordering::SeqCst);
            debug!(
                "PricePoller: Backing off after {} consecutive failures, skipping tick",
                failures
            );
            return TickOutcome::Skipped;
        }

        let quotes = match self.provider.fetch_simple_prices(asset_ids).await {
            Ok(q) => q,
            Err(e) => {
                let n = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("PricePoller: Price fetch failed ({} in a row): {}", n, e);
                return TickOutcome::Failed;
            }
        };
        self.consecutive_failures.store(0, Ordering::SeqCst);

        let (applied, update) = {
            let mut live = self.write();
            let mut applied = 0;
            for (id, quote) in quotes {
                // Non-positive prices are upstream glitches; keep the previous value
                if quote.price <= 0.0 {
                    continue;
                }
                live.prices.insert(id.clone(), quote.price);
                live.changes.insert(id, quote.change_24h);
                applied += 1;
            }
            let update = PriceUpdate {
                prices: live.prices.clone(),
                changes: live.changes.clone(),
            };
            (applied, update)
        };

        self.events.publish(&update);
        TickOutcome::Updated(applied)
    }
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodically refreshes current price and 24h change for a fixed asset
/// list, independent of the historical-series machinery.
///
/// After `failure_threshold` consecutive failures each tick is skipped and
/// the counter drops by one, so attempts resume gradually without stopping
/// the timer.
pub struct PricePoller {
    state: Arc<PollState>,
    settings: PollerSettings,
    task: Mutex<Option<RunningTask>>,
}

impl PricePoller {
    pub fn new(provider: Arc<dyn MarketDataProvider>, mut settings: PollerSettings) -> Self {
        settings.interval = settings.interval.max(MIN_POLL_INTERVAL);
        Self {
            state: Arc::new(PollState {
                provider,
                quotes: RwLock::new(LiveQuotes::default()),
                consecutive_failures: AtomicU32::new(0),
                events: EventBus::new(),
                failure_threshold: settings.failure_threshold.max(1),
            }),
            settings,
            task: Mutex::new(None),
        }
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<RunningTask>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed the live maps from `assets` and start the timer task.
    /// Returns false (and does nothing) if already running or `assets` is empty.
    pub fn start(&self, assets: &[AssetSnapshot]) -> bool {
        let mut slot = self.task_slot();
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            info!("PricePoller: Already running, ignoring start");
            return false;
        }
        if assets.is_empty() {
            info!("PricePoller: No assets to poll, not starting");
            return false;
        }

        {
            let mut live = self.state.write();
            live.prices.clear();
            live.changes.clear();
            for a in assets {
                live.prices.insert(a.id.clone(), a.price);
                live.changes.insert(a.id.clone(), a.change_percent_24h);
            }
        }
        self.state.consecutive_failures.store(0, Ordering::SeqCst);

        let asset_ids: Vec<String> = assets.iter().map(|a| a.id.clone()).collect();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.state.clone(),
            asset_ids,
            self.settings.clone(),
            cancel.clone(),
        ));

        info!(
            "PricePoller: Started for {} assets (every {:?}, first poll in {:?})",
            assets.len(),
            self.settings.interval,
            self.settings.initial_delay
        );
        *slot = Some(RunningTask { cancel, handle });
        true
    }

    /// Stop the timer, wait up to the grace period for an in-flight tick,
    /// then abort it. Safe to call repeatedly.
    pub async fn stop(&self) {
        let running = self.task_slot().take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();

        let mut handle = running.handle;
        match time::timeout(self.settings.stop_grace, &mut handle).await {
            Ok(_) => info!("PricePoller: Stopped"),
            Err(_) => {
                warn!(
                    "PricePoller: Tick still running after {:?}, aborting",
                    self.settings.stop_grace
                );
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_slot()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn get_price(&self, asset_id: &str) -> Option<f64> {
        self.state.read().prices.get(asset_id).copied()
    }

    pub fn get_change(&self, asset_id: &str) -> Option<f64> {
        self.state.read().changes.get(asset_id).copied()
    }

    pub fn get_all_prices(&self) -> HashMap<String, f64> {
        self.state.read().prices.clone()
    }

    pub fn get_all_changes(&self) -> HashMap<String, f64> {
        self.state.read().changes.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener<PriceUpdate>>) -> Subscription<PriceUpdate> {
        self.state.events.subscribe(listener)
    }

    pub fn register_price_callback<F>(&self, callback: F) -> Subscription<PriceUpdate>
    where
        F: Fn(&PriceUpdate) + Send + Sync + 'static,
    {
        self.state.events.subscribe(Arc::new(callback))
    }
}

async fn run_loop(
    state: Arc<PollState>,
    asset_ids: Vec<String>,
    settings: PollerSettings,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = time::sleep(settings.initial_delay) => {}
    }

    let mut ticker = time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // A started tick runs to completion; stop() bounds it with the grace period
        if cancel.is_cancelled() {
            break;
        }
        if let TickOutcome::Updated(n) = state.tick(&asset_ids).await {
            debug!("PricePoller: Applied {} quotes", n);
        }
    }
    debug!("PricePoller: Loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::MarketDataError;
    use crate::infrastructure::mock::{Endpoint, MockMarketDataProvider};

    fn settings() -> PollerSettings {
        PollerSettings {
            interval: Duration::from_secs(5),
            initial_delay: Duration::from_secs(1),
            failure_threshold: 3,
            stop_grace: Duration::from_secs(5),
        }
    }

    async fn setup() -> (Arc<MockMarketDataProvider>, PricePoller, Vec<AssetSnapshot>) {
        let mock = Arc::new(MockMarketDataProvider::with_sample_data());
        let assets = mock.fetch_top_assets(5).await.unwrap();
        let poller = PricePoller::new(mock.clone(), settings());
        (mock, poller, assets)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_seeds_and_rejects_duplicates() {
        let (mock, poller, assets) = setup().await;

        assert!(!poller.start(&[]));
        assert!(poller.start(&assets));
        assert!(!poller.start(&assets));
        assert!(poller.is_running());

        assert_eq!(poller.get_price("bitcoin"), Some(60123.45));
        assert_eq!(poller.get_change("ethereum"), Some(-1.2));
        assert_eq!(poller.get_price("dogecoin"), None);
        assert_eq!(mock.calls(Endpoint::SimplePrice), 0);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_waits_for_initial_delay() {
        let mock = Arc::new(MockMarketDataProvider::with_sample_data());
        let assets = mock.fetch_top_assets(5).await.unwrap();
        let poller = PricePoller::new(
            mock.clone(),
            PollerSettings {
                initial_delay: Duration::from_secs(30),
                ..settings()
            },
        );
        mock.set_quote("bitcoin", 61000.0, 3.0);
        poller.start(&assets);

        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 0);
        assert_eq!(poller.get_price("bitcoin"), Some(60123.45));

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 1);
        assert_eq!(poller.get_price("bitcoin"), Some(61000.0));
        assert_eq!(poller.get_change("bitcoin"), Some(3.0));

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_receives_full_copy() {
        let (mock, poller, assets) = setup().await;
        let received = Arc::new(Mutex::new(Vec::<PriceUpdate>::new()));
        let sink = received.clone();
        let _sub = poller.register_price_callback(move |update| {
            sink.lock().unwrap().push(update.clone());
        });

        mock.set_quote("solana", 200.0, 1.5);
        poller.start(&assets);
        time::sleep(Duration::from_secs(2)).await;

        let updates = received.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].prices.len(), 5);
        assert_eq!(updates[0].prices["solana"], 200.0);
        assert_eq!(updates[0].changes["solana"], 1.5);
        drop(updates);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_positive_price_is_ignored() {
        let (mock, poller, assets) = setup().await;
        mock.set_quote("cardano", 0.0, -100.0);
        mock.set_quote("bitcoin", 62000.0, 1.0);

        poller.start(&assets);
        time::sleep(Duration::from_secs(2)).await;

        assert_eq!(poller.get_price("cardano"), Some(2.34));
        assert_eq!(poller.get_change("cardano"), Some(5.6));
        assert_eq!(poller.get_price("bitcoin"), Some(62000.0));

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_skips_then_resumes() {
        let (mock, poller, assets) = setup().await;
        mock.fail_always(Endpoint::SimplePrice, MarketDataError::RateLimited);
        poller.start(&assets);

        // Ticks at t=1, 6, 11 all fail
        time::sleep(Duration::from_secs(13)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 3);
        assert_eq!(poller.consecutive_failures(), 3);

        // t=16 is skipped
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 3);
        assert_eq!(poller.consecutive_failures(), 2);

        // t=21 attempts again and fails
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 4);
        assert_eq!(poller.consecutive_failures(), 3);

        mock.clear_faults();
        mock.set_quote("bitcoin", 59000.0, -2.0);

        // t=26 skipped, t=31 succeeds and resets the counter
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 5);
        assert_eq!(poller.consecutive_failures(), 0);
        assert_eq!(poller.get_price("bitcoin"), Some(59000.0));

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_polling() {
        let (mock, poller, assets) = setup().await;
        poller.start(&assets);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 1);

        poller.stop().await;
        poller.stop().await;
        assert!(!poller.is_running());

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 1);

        // Restart is allowed after a stop
        assert!(poller.start(&assets));
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_tick_finish_within_grace() {
        let (mock, poller, assets) = setup().await;
        mock.set_latency(Duration::from_secs(2));
        mock.set_quote("bitcoin", 70000.0, 4.0);
        poller.start(&assets);

        // The tick starts at t=1 and completes at t=3
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(mock.calls(Endpoint::SimplePrice), 1);
        let started = time::Instant::now();
        poller.stop().await;

        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(poller.get_price("bitcoin"), Some(70000.0));
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_tick_exceeding_grace() {
        let (mock, poller, assets) = setup().await;
        mock.set_latency(Duration::from_secs(60));
        mock.set_quote("bitcoin", 70000.0, 4.0);
        poller.start(&assets);

        time::sleep(Duration::from_secs(2)).await;
        let started = time::Instant::now();
        poller.stop().await;

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(!poller.is_running());

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(poller.get_price("bitcoin"), Some(60123.45));
        assert_eq!(mock.calls(Endpoint::SimplePrice), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let config = MarketDataConfig {
            poll_interval: Duration::ZERO,
            poll_initial_delay: Duration::ZERO,
            ..MarketDataConfig::default()
        };
        assert_eq!(PollerSettings::from_config(&config).interval, MIN_POLL_INTERVAL);

        let mock = Arc::new(MockMarketDataProvider::with_sample_data());
        let assets = mock.fetch_top_assets(5).await.unwrap();
        let poller = PricePoller::new(
            mock.clone(),
            PollerSettings {
                interval: Duration::ZERO,
                initial_delay: Duration::ZERO,
                ..settings()
            },
        );
        assert!(poller.start(&assets));

        time::sleep(Duration::from_millis(250)).await;
        assert!(poller.is_running());
        assert!(mock.calls(Endpoint::SimplePrice) >= 2);

        poller.stop().await;
    }
}
