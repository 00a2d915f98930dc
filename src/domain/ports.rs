use crate::domain::assets::{AssetSnapshot, HistoricalSeries, Interval};
use crate::domain::errors::MarketDataError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Live quote returned by the lightweight batched price endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub change_24h: f64,
}

/// Upstream market-data API. Each method performs exactly one call; retry
/// policy is layered on top by the callers.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Top `limit` assets by market capitalization
    async fn fetch_top_assets(&self, limit: usize) -> Result<Vec<AssetSnapshot>, MarketDataError>;

    async fn fetch_market_chart(
        &self,
        asset_id: &str,
        interval: Interval,
    ) -> Result<HistoricalSeries, MarketDataError>;

    /// Current price and 24h change for every requested id in one call.
    /// Ids the upstream does not know are simply absent from the result.
    async fn fetch_simple_prices(
        &self,
        asset_ids: &[String],
    ) -> Result<HashMap<String, PriceQuote>, MarketDataError>;

    /// One unretried chart call where a series with no points counts as a
    /// failure, so callers never cache "no data" as data.
    async fn fetch_series_once(
        &self,
        asset_id: &str,
        interval: Interval,
    ) -> Result<HistoricalSeries, MarketDataError> {
        let series = self.fetch_market_chart(asset_id, interval).await?;
        if series.is_empty() {
            return Err(MarketDataError::EmptyResult);
        }
        Ok(series)
    }
}
