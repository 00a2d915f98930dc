use chrono::{TimeZone, Utc};
use marketcache::application::market_data::MarketDataService;
use marketcache::config::MarketDataConfig;
use marketcache::domain::assets::{Interval, SeriesPoint};
use marketcache::domain::errors::MarketDataError;
use marketcache::domain::events::ProgressEvent;
use marketcache::infrastructure::mock::{Endpoint, MockMarketDataProvider, sample_asset};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn three_points() -> Vec<SeriesPoint> {
    (0..3)
        .map(|i| SeriesPoint {
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000 + i * 60_000).unwrap(),
            price: Some(100.0 + i as f64),
            volume: Some(1_000.0),
        })
        .collect()
}

fn two_asset_mock() -> Arc<MockMarketDataProvider> {
    let mock = Arc::new(MockMarketDataProvider::new());
    mock.set_assets(vec![
        sample_asset("bitcoin", "Bitcoin", "BTC", 60000.0, 1.0),
        sample_asset("ethereum", "Ethereum", "ETH", 3000.0, -0.5),
    ]);
    mock.set_chart("bitcoin", Interval::OneDay, three_points());
    mock.set_chart("ethereum", Interval::OneDay, three_points());
    mock
}

fn one_day_config() -> MarketDataConfig {
    MarketDataConfig {
        intervals: vec![Interval::OneDay],
        ..MarketDataConfig::default()
    }
}

fn record_events(service: &MarketDataService) -> Arc<Mutex<Vec<ProgressEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    // The handle is dropped on purpose: the listener stays attached
    let _ = service.register_progress_callback(move |e| sink.lock().unwrap().push(e.clone()));
    events
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_preload() {
    let mock = two_asset_mock();
    let service = MarketDataService::new(mock.clone(), &one_day_config());
    let events = record_events(&service);

    let report = service.preload_all().await;

    assert!(report.is_clean());
    assert!(service.has_historical_series("bitcoin", "1"));
    assert!(service.has_historical_series("ethereum", "1"));
    assert_eq!(service.get_failed_count(), 0);

    let events = events.lock().unwrap();
    let completes: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::IntervalComplete { .. }))
        .collect();
    assert_eq!(
        completes,
        vec![&ProgressEvent::IntervalComplete {
            interval: Interval::OneDay,
            success: true
        }]
    );

    let ready = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::AssetReady { success: true, .. }))
        .count();
    assert_eq!(ready, 2);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_copy_is_independent() {
    let service = MarketDataService::new(two_asset_mock(), &one_day_config());

    let mut first = service.get_snapshot().await;
    first.clear();

    assert_eq!(service.get_snapshot().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_and_reload() {
    let mock = two_asset_mock();
    let service = MarketDataService::new(mock.clone(), &one_day_config());

    service.preload_all().await;
    assert_eq!(mock.calls(Endpoint::MarketChart), 2);

    service.clear_cache();
    assert!(!service.cache().has_snapshot());
    assert!(!service.has_historical_series("bitcoin", "1"));
    assert_eq!(service.get_failed_count(), 0);

    let report = service.preload_all().await;
    assert_eq!(report.fetched, 2);
    assert_eq!(mock.calls(Endpoint::Markets), 2);
    assert_eq!(mock.calls(Endpoint::MarketChart), 4);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_reports_unsuccessful_completion() {
    let mock = two_asset_mock();
    mock.fail_chart("ethereum", Interval::OneDay, 100, MarketDataError::from_status(503));
    let service = MarketDataService::new(mock.clone(), &one_day_config());
    let events = record_events(&service);

    let report = service.preload_all().await;

    assert_eq!(report.failed, 1);
    assert_eq!(service.get_failed_count(), 1);
    assert!(service.has_historical_series("bitcoin", "1"));
    assert!(!service.has_historical_series("ethereum", "1"));

    let events = events.lock().unwrap();
    assert!(events.contains(&ProgressEvent::AssetReady {
        asset_id: "ethereum".to_string(),
        success: false
    }));
    assert!(events.contains(&ProgressEvent::IntervalComplete {
        interval: Interval::OneDay,
        success: false
    }));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_lazy_loads_during_preload() {
    let mock = Arc::new(MockMarketDataProvider::with_sample_data());
    mock.set_latency(Duration::from_millis(50));
    let service = Arc::new(MarketDataService::new(mock.clone(), &MarketDataConfig::default()));

    let preload = {
        let service = service.clone();
        tokio::spawn(async move { service.preload_all().await })
    };
    let readers: Vec<_> = ["bitcoin", "ethereum", "solana"]
        .into_iter()
        .map(|id| {
            let service = service.clone();
            tokio::spawn(async move { service.get_historical_series(id, "90").await.len() })
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.await.unwrap(), 24);
    }
    let report = preload.await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(service.get_failed_count(), 0);
    assert_eq!(service.cache().series_count(), 25);
}
