//! Market Watch - headless market data demo
//!
//! Fetches the top assets, preloads every historical interval into the cache
//! and then keeps live prices fresh until Ctrl+C.
//!
//! # Usage
//! ```sh
//! RUST_LOG=marketcache=debug cargo run --bin market_watch
//! ```
//!
//! # Environment Variables
//! - `COINGECKO_API_KEY` - Optional demo API key
//! - `MARKET_TOP_N` - Number of assets to track (default: 5)
//! - `MARKET_OFFLINE` - Use the built-in sample data instead of the network
//! - `MARKET_CHART` - Chart label summarized for the top asset (default: 1D)

use anyhow::Result;
use marketcache::application::market_data::{MarketDataService, PollerSettings, PricePoller};
use marketcache::config::MarketDataConfig;
use marketcache::domain::assets::Interval;
use marketcache::domain::events::LoggingListener;
use marketcache::domain::ports::MarketDataProvider;
use marketcache::infrastructure::{CoinGeckoProvider, MockMarketDataProvider};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Market Watch {} starting...", env!("CARGO_PKG_VERSION"));

    let config = MarketDataConfig::from_env()?;
    info!(
        "Configuration loaded: top_n={}, intervals={:?}, base_url={}",
        config.top_n, config.intervals, config.base_url
    );

    let offline = std::env::var("MARKET_OFFLINE")
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let provider: Arc<dyn MarketDataProvider> = if offline {
        info!("Mode: OFFLINE (sample data)");
        Arc::new(MockMarketDataProvider::with_sample_data())
    } else {
        Arc::new(CoinGeckoProvider::from_config(&config))
    };

    let service = Arc::new(MarketDataService::new(provider.clone(), &config));
    let _progress = service.subscribe(Arc::new(LoggingListener));

    let assets = service.get_snapshot().await;
    if assets.is_empty() {
        warn!("No assets available from upstream. Exiting.");
        return Ok(());
    }
    for asset in &assets {
        info!(
            "{:<12} {:<6} {:>14} {:>8}  cap {}",
            asset.name,
            asset.symbol,
            asset.price_formatted(),
            asset.change_formatted(),
            asset.market_cap
        );
    }

    let chart_label = std::env::var("MARKET_CHART").unwrap_or_else(|_| "1D".to_string());
    let top = &assets[0];
    let series = service.get_series(&top.id, Interval::from_label(&chart_label)).await;
    match (series.first(), series.last()) {
        (Some(first), Some(last)) => info!(
            "{} chart {}: {} points, {:?} -> {:?}",
            top.symbol,
            chart_label,
            series.len(),
            first.price,
            last.price
        ),
        _ => warn!("{} chart {}: no data", top.symbol, chart_label),
    }

    let poller = PricePoller::new(provider, PollerSettings::from_config(&config));
    let _prices = poller.register_price_callback(|update| {
        info!("Live prices: {} assets updated", update.prices.len());
    });
    poller.start(&assets);

    let preload = {
        let service = service.clone();
        tokio::spawn(async move { service.preload_all().await })
    };

    info!("Running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received...");

    service.cancel();
    match preload.await {
        Ok(report) => info!(
            "Preload finished: fetched={}, cached={}, failed={}, cancelled={}",
            report.fetched, report.already_cached, report.failed, report.cancelled
        ),
        Err(e) => warn!("Preload task ended abnormally: {}", e),
    }
    poller.stop().await;

    for asset in &assets {
        if let Some(price) = poller.get_price(&asset.id) {
            info!("Last price {}: {:.2}", asset.symbol, price);
        }
    }

    Ok(())
}
