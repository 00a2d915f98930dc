use crate::domain::assets::{AssetSnapshot, HistoricalSeries, Interval, SeriesPoint};
use crate::domain::errors::MarketDataError;
use crate::domain::ports::{MarketDataProvider, PriceQuote};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Upstream endpoints, for fault injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Markets,
    MarketChart,
    SimplePrice,
}

#[derive(Default)]
struct MockState {
    assets: Vec<AssetSnapshot>,
    charts: HashMap<(String, Interval), Vec<SeriesPoint>>,
    default_chart_len: Option<usize>,
    quotes: HashMap<String, PriceQuote>,

    // Queued one-shot failures, consumed front to back
    endpoint_faults: HashMap<Endpoint, VecDeque<MarketDataError>>,
    chart_faults: HashMap<(String, Interval), VecDeque<MarketDataError>>,
    // Failures returned on every call until cleared
    sticky_faults: HashMap<Endpoint, MarketDataError>,

    calls: HashMap<Endpoint, usize>,
    chart_calls: HashMap<(String, Interval), usize>,
    latency: Duration,
}

/// In-memory upstream with scripted data, fault injection and call counters.
/// Used by the test suites and by the demo binary's offline mode.
pub struct MockMarketDataProvider {
    state: Mutex<MockState>,
}

impl MockMarketDataProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Canned five-asset universe with a 24-point series for every interval
    pub fn with_sample_data() -> Self {
        let mock = Self::new();
        mock.set_assets(vec![
            sample_asset("bitcoin", "Bitcoin", "BTC", 60123.45, 2.5),
            sample_asset("ethereum", "Ethereum", "ETH", 3456.78, -1.2),
            sample_asset("binancecoin", "BNB", "BNB", 456.78, 0.8),
            sample_asset("cardano", "Cardano", "ADA", 2.34, 5.6),
            sample_asset("solana", "Solana", "SOL", 178.90, -0.7),
        ]);
        mock.set_default_chart_len(24);
        mock
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_assets(&self, assets: Vec<AssetSnapshot>) {
        let mut state = self.lock();
        for a in &assets {
            state.quotes.insert(
                a.id.clone(),
                PriceQuote {
                    price: a.price,
                    change_24h: a.change_percent_24h,
                },
            );
        }
        state.assets = assets;
    }

    pub fn set_chart(&self, asset_id: &str, interval: Interval, points: Vec<SeriesPoint>) {
        self.lock()
            .charts
            .insert((asset_id.to_string(), interval), points);
    }

    /// Serve a generated series of `len` points for any unscripted (asset, interval)
    pub fn set_default_chart_len(&self, len: usize) {
        self.lock().default_chart_len = Some(len);
    }

    pub fn set_quote(&self, asset_id: &str, price: f64, change_24h: f64) {
        self.lock()
            .quotes
            .insert(asset_id.to_string(), PriceQuote { price, change_24h });
    }

    /// Artificial delay applied to every call
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Fail the next `times` calls to `endpoint` with `error`
    pub fn fail_next(&self, endpoint: Endpoint, times: usize, error: MarketDataError) {
        let mut state = self.lock();
        let queue = state.endpoint_faults.entry(endpoint).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Fail the next `times` chart calls for one (asset, interval)
    pub fn fail_chart(&self, asset_id: &str, interval: Interval, times: usize, error: MarketDataError) {
        let mut state = self.lock();
        let queue = state
            .chart_faults
            .entry((asset_id.to_string(), interval))
            .or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Fail every call to `endpoint` until [`Self::clear_faults`]
    pub fn fail_always(&self, endpoint: Endpoint, error: MarketDataError) {
        self.lock().sticky_faults.insert(endpoint, error);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.endpoint_faults.clear();
        state.chart_faults.clear();
        state.sticky_faults.clear();
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.lock().calls.get(&endpoint).copied().unwrap_or(0)
    }

    pub fn chart_calls_for(&self, asset_id: &str, interval: Interval) -> usize {
        self.lock()
            .chart_calls
            .get(&(asset_id.to_string(), interval))
            .copied()
            .unwrap_or(0)
    }

    /// Records the call and returns the latency plus any injected failure
    fn begin_call(
        &self,
        endpoint: Endpoint,
        chart_key: Option<(String, Interval)>,
    ) -> (Duration, Option<MarketDataError>) {
        let mut state = self.lock();
        *state.calls.entry(endpoint).or_insert(0) += 1;

        let mut fault = state.sticky_faults.get(&endpoint).cloned();
        if fault.is_none() {
            fault = state
                .endpoint_faults
                .get_mut(&endpoint)
                .and_then(VecDeque::pop_front);
        }
        if let Some(key) = chart_key {
            *state.chart_calls.entry(key.clone()).or_insert(0) += 1;
            if fault.is_none() {
                fault = state
                    .chart_faults
                    .get_mut(&key)
                    .and_then(VecDeque::pop_front);
            }
        }
        (state.latency, fault)
    }
}

impl Default for MockMarketDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    async fn fetch_top_assets(&self, limit: usize) -> Result<Vec<AssetSnapshot>, MarketDataError> {
        let (latency, fault) = self.begin_call(Endpoint::Markets, None);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(e) = fault {
            debug!("MockMarketDataProvider: Injected markets failure: {}", e);
            return Err(e);
        }
        Ok(self.lock().assets.iter().take(limit).cloned().collect())
    }

    async fn fetch_market_chart(
        &self,
        asset_id: &str,
        interval: Interval,
    ) -> Result<HistoricalSeries, MarketDataError> {
        let key = (asset_id.to_string(), interval);
        let (latency, fault) = self.begin_call(Endpoint::MarketChart, Some(key.clone()));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(e) = fault {
            debug!(
                "MockMarketDataProvider: Injected chart failure for {} {}: {}",
                asset_id, interval, e
            );
            return Err(e);
        }

        let state = self.lock();
        if let Some(points) = state.charts.get(&key) {
            return Ok(HistoricalSeries::new(points.clone()));
        }
        let known = state.assets.iter().any(|a| a.id == asset_id);
        match state.default_chart_len {
            Some(len) if known => Ok(generated_series(len)),
            _ => Ok(HistoricalSeries::empty()),
        }
    }

    async fn fetch_simple_prices(
        &self,
        asset_ids: &[String],
    ) -> Result<HashMap<String, PriceQuote>, MarketDataError> {
        let (latency, fault) = self.begin_call(Endpoint::SimplePrice, None);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(e) = fault {
            debug!("MockMarketDataProvider: Injected price failure: {}", e);
            return Err(e);
        }

        let state = self.lock();
        Ok(asset_ids
            .iter()
            .filter_map(|id| state.quotes.get(id).map(|q| (id.clone(), *q)))
            .collect())
    }
}

pub fn sample_asset(id: &str, name: &str, symbol: &str, price: f64, change: f64) -> AssetSnapshot {
    AssetSnapshot {
        id: id.to_string(),
        name: name.to_string(),
        symbol: symbol.to_string(),
        price,
        change_percent_24h: change,
        market_cap: crate::domain::assets::format_money_short(price * 19_000_000.0),
        volume: crate::domain::assets::format_money_short(price * 500_000.0),
        circulating_supply: crate::domain::assets::format_number_short(19_000_000.0),
    }
}

/// Hourly points starting at a fixed instant
pub fn generated_series(len: usize) -> HistoricalSeries {
    let start = 1_700_000_000_000i64;
    let points = (0..len)
        .filter_map(|i| {
            let ts = Utc.timestamp_millis_opt(start + i as i64 * 3_600_000).single()?;
            Some(SeriesPoint {
                timestamp: ts,
                price: Some(100.0 + i as f64),
                volume: Some(10_000.0),
            })
        })
        .collect();
    HistoricalSeries::new(points)
}
