use marketcache::application::market_data::{MarketDataService, PollerSettings, PricePoller};
use marketcache::config::MarketDataConfig;
use marketcache::domain::errors::MarketDataError;
use marketcache::infrastructure::mock::{Endpoint, MockMarketDataProvider};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_poller_fed_from_snapshot_recovers_from_outage() {
    let mock = Arc::new(MockMarketDataProvider::with_sample_data());
    let config = MarketDataConfig::default();
    let service = MarketDataService::new(mock.clone(), &config);
    let assets = service.get_snapshot().await;

    let poller = PricePoller::new(mock.clone(), PollerSettings::from_config(&config));
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    let _sub = poller.register_price_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    mock.fail_always(Endpoint::SimplePrice, MarketDataError::RateLimited);
    assert!(poller.start(&assets));

    // Default schedule: first poll at 30s, then every 5s (30, 35, 40 fail)
    tokio::time::sleep(Duration::from_secs(42)).await;
    assert_eq!(mock.calls(Endpoint::SimplePrice), 3);
    assert_eq!(poller.consecutive_failures(), 3);
    assert_eq!(updates.load(Ordering::SeqCst), 0);

    // 45 is skipped
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mock.calls(Endpoint::SimplePrice), 3);

    mock.clear_faults();
    mock.set_quote("bitcoin", 65000.0, 4.0);

    // 50 attempts and succeeds
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(mock.calls(Endpoint::SimplePrice), 4);
    assert_eq!(poller.consecutive_failures(), 0);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(poller.get_price("bitcoin"), Some(65000.0));
    assert_eq!(poller.get_all_changes()["bitcoin"], 4.0);

    poller.stop().await;
    assert!(!poller.is_running());
}
