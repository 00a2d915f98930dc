//! CoinGecko Market Data Provider
//!
//! Implements [`MarketDataProvider`] against the public CoinGecko REST API:
//! - `/coins/markets` for the top-N snapshot
//! - `/coins/{id}/market_chart` for historical series
//! - `/simple/price` for batched live quotes
//!
//! Every method performs exactly one HTTP call. Non-2xx responses are mapped
//! onto [`MarketDataError`] so the retry layer can classify them.

use super::http_client_factory::HttpClientFactory;
use crate::config::MarketDataConfig;
use crate::domain::assets::{
    AssetSnapshot, HistoricalSeries, Interval, SeriesPoint, format_money_short,
    format_number_short,
};
use crate::domain::errors::MarketDataError;
use crate::domain::ports::{MarketDataProvider, PriceQuote};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-cg-demo-api-key";

pub struct CoinGeckoProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    vs_currency: String,
}

impl CoinGeckoProvider {
    pub fn builder() -> CoinGeckoProviderBuilder {
        CoinGeckoProviderBuilder::default()
    }

    pub fn from_config(config: &MarketDataConfig) -> Self {
        let mut builder = Self::builder()
            .base_url(config.base_url.clone())
            .vs_currency(config.vs_currency.clone())
            .request_timeout(config.request_timeout);
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key.clone());
        }
        builder.build()
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| MarketDataError::Network {
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                "CoinGeckoProvider: {} returned {}: {}",
                path,
                status,
                body.chars().take(200).collect::<String>()
            );
            return Err(MarketDataError::from_status(status.as_u16()));
        }

        response.text().await.map_err(|e| MarketDataError::Network {
            reason: e.to_string(),
        })
    }
}

#[derive(Default)]
pub struct CoinGeckoProviderBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    vs_currency: Option<String>,
    request_timeout: Option<Duration>,
}

impl CoinGeckoProviderBuilder {
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn vs_currency(mut self, vs_currency: String) -> Self {
        self.vs_currency = Some(vs_currency);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> CoinGeckoProvider {
        let defaults = MarketDataConfig::default();
        let api_key = self.api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("CoinGeckoProvider: No API key configured, using unauthenticated access");
        }

        let base_url = self
            .base_url
            .unwrap_or(defaults.base_url)
            .trim_end_matches('/')
            .to_string();

        CoinGeckoProvider {
            client: HttpClientFactory::create_client(
                self.request_timeout.unwrap_or(defaults.request_timeout),
            ),
            base_url,
            api_key,
            vs_currency: self
                .vs_currency
                .unwrap_or(defaults.vs_currency)
                .to_lowercase(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    async fn fetch_top_assets(&self, limit: usize) -> Result<Vec<AssetSnapshot>, MarketDataError> {
        let body = self
            .get(
                "/coins/markets",
                &[
                    ("vs_currency", self.vs_currency.clone()),
                    ("order", "market_cap_desc".to_string()),
                    ("per_page", limit.to_string()),
                    ("page", "1".to_string()),
                    ("sparkline", "false".to_string()),
                    ("price_change_percentage", "24h".to_string()),
                ],
            )
            .await?;
        let assets = parse_markets(&body)?;
        debug!("CoinGeckoProvider: Fetched {} assets", assets.len());
        Ok(assets)
    }

    async fn fetch_market_chart(
        &self,
        asset_id: &str,
        interval: Interval,
    ) -> Result<HistoricalSeries, MarketDataError> {
        let path = format!("/coins/{}/market_chart", asset_id);
        let body = self
            .get(
                &path,
                &[
                    ("vs_currency", self.vs_currency.clone()),
                    ("days", interval.key().to_string()),
                ],
            )
            .await?;
        parse_market_chart(&body)
    }

    async fn fetch_simple_prices(
        &self,
        asset_ids: &[String],
    ) -> Result<HashMap<String, PriceQuote>, MarketDataError> {
        if asset_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let body = self
            .get(
                "/simple/price",
                &[
                    ("ids", asset_ids.join(",")),
                    ("vs_currencies", self.vs_currency.clone()),
                    ("include_24hr_change", "true".to_string()),
                ],
            )
            .await?;
        parse_simple_prices(&body, asset_ids, &self.vs_currency)
    }
}

fn decode_error(e: serde_json::Error) -> MarketDataError {
    MarketDataError::Decode {
        reason: e.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct MarketRow {
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    current_price: Option<f64>,
    #[serde(default)]
    price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    total_volume: Option<f64>,
    #[serde(default)]
    circulating_supply: Option<f64>,
}

/// Parses a `/coins/markets` body. Rows that are malformed or lack an id are
/// skipped without failing the payload; missing numbers read as zero.
pub fn parse_markets(body: &str) -> Result<Vec<AssetSnapshot>, MarketDataError> {
    let rows: Vec<Value> = serde_json::from_str(body).map_err(decode_error)?;
    let total = rows.len();

    let assets: Vec<AssetSnapshot> = rows
        .into_iter()
        .filter_map(|raw| {
            let row: MarketRow = match serde_json::from_value(raw) {
                Ok(row) => row,
                Err(e) => {
                    debug!("CoinGeckoProvider: Skipping malformed market row: {}", e);
                    return None;
                }
            };
            let id = row.id.filter(|id| !id.is_empty())?;
            Some(AssetSnapshot {
                name: row.name.unwrap_or_else(|| id.clone()),
                symbol: row.symbol.unwrap_or_default().to_uppercase(),
                price: row.current_price.unwrap_or(0.0),
                change_percent_24h: row.price_change_percentage_24h.unwrap_or(0.0),
                market_cap: format_money_short(row.market_cap.unwrap_or(0.0)),
                volume: format_money_short(row.total_volume.unwrap_or(0.0)),
                circulating_supply: format_number_short(row.circulating_supply.unwrap_or(0.0)),
                id,
            })
        })
        .collect();

    if assets.len() < total {
        warn!(
            "CoinGeckoProvider: Dropped {} of {} market rows",
            total - assets.len(),
            total
        );
    }
    Ok(assets)
}

/// `[timestamp_ms, value, ..]`, with a null value read as `None`
fn chart_pair(entry: &Value) -> Option<(i64, Option<f64>)> {
    let pair = entry.as_array().filter(|a| a.len() >= 2)?;
    let ts = pair[0].as_f64()? as i64;
    Some((ts, pair[1].as_f64()))
}

/// Parses a `/coins/{id}/market_chart` body. A missing `prices` array gives
/// an empty series; malformed entries are dropped.
pub fn parse_market_chart(body: &str) -> Result<HistoricalSeries, MarketDataError> {
    let root: Value = serde_json::from_str(body).map_err(decode_error)?;

    let Some(prices) = root.get("prices").and_then(Value::as_array) else {
        return Ok(HistoricalSeries::empty());
    };
    let volumes = root
        .get("total_volumes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let points = prices
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let (ts, price) = chart_pair(entry)?;
            let timestamp = Utc.timestamp_millis_opt(ts).single()?;
            let volume = volumes.get(i).and_then(chart_pair).and_then(|(_, v)| v);
            Some(SeriesPoint {
                timestamp,
                price,
                volume,
            })
        })
        .collect();

    Ok(HistoricalSeries::new(points))
}

/// Parses a `/simple/price` body for the requested ids. Ids the upstream
/// omitted, or returned without a numeric price, are absent from the result;
/// one bad entry never spoils the others.
pub fn parse_simple_prices(
    body: &str,
    asset_ids: &[String],
    vs_currency: &str,
) -> Result<HashMap<String, PriceQuote>, MarketDataError> {
    let root: HashMap<String, Value> = serde_json::from_str(body).map_err(decode_error)?;
    let change_key = format!("{}_24h_change", vs_currency);

    Ok(asset_ids
        .iter()
        .filter_map(|id| {
            let fields = root.get(id)?.as_object()?;
            let price = fields.get(vs_currency).and_then(Value::as_f64)?;
            let change_24h = fields
                .get(&change_key)
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some((id.clone(), PriceQuote { price, change_24h }))
        })
        .collect())
}
