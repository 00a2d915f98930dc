use marketcache::application::market_data::MarketDataService;
use marketcache::config::MarketDataConfig;
use marketcache::domain::assets::Interval;
use marketcache::domain::errors::MarketDataError;
use marketcache::infrastructure::mock::{Endpoint, MockMarketDataProvider};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let mock = Arc::new(MockMarketDataProvider::with_sample_data());
    mock.fail_next(Endpoint::Markets, 2, MarketDataError::RateLimited);
    let service = MarketDataService::new(mock.clone(), &MarketDataConfig::default());

    let assets = service.get_snapshot().await;

    assert_eq!(assets.len(), 5);
    assert_eq!(mock.calls(Endpoint::Markets), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_exhausted_exactly() {
    let mock = Arc::new(MockMarketDataProvider::with_sample_data());
    mock.fail_always(Endpoint::MarketChart, MarketDataError::from_status(500));
    let config = MarketDataConfig::default();
    let service = MarketDataService::new(mock.clone(), &config);
    let started = tokio::time::Instant::now();

    let series = service.get_series("bitcoin", Interval::OneWeek).await;

    assert!(series.is_empty());
    assert_eq!(mock.chart_calls_for("bitcoin", Interval::OneWeek), config.max_retries);
    let total_backoff: Duration = config.retry_delays.iter().sum();
    assert!(started.elapsed() >= total_backoff);
    assert!(!service.has_historical_series("bitcoin", "7"));
}

#[tokio::test(start_paused = true)]
async fn test_decode_errors_are_not_retried() {
    let mock = Arc::new(MockMarketDataProvider::with_sample_data());
    mock.fail_next(
        Endpoint::Markets,
        1,
        MarketDataError::Decode {
            reason: "unexpected token".to_string(),
        },
    );
    let service = MarketDataService::new(mock.clone(), &MarketDataConfig::default());

    assert!(service.get_snapshot().await.is_empty());
    assert_eq!(mock.calls(Endpoint::Markets), 1);

    // Nothing was cached, so the next call goes upstream again
    assert_eq!(service.get_snapshot().await.len(), 5);
    assert_eq!(mock.calls(Endpoint::Markets), 2);
}
