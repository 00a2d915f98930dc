//! Upstream API configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Upstream environment configuration
#[derive(Debug, Clone)]
pub struct UpstreamEnvConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub vs_currency: String,
    pub top_n: usize,
    pub request_timeout: Duration,
}

impl Default for UpstreamEnvConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            vs_currency: "usd".to_string(),
            top_n: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let api_key = env::var("COINGECKO_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let top_n = match env::var("MARKET_TOP_N") {
            Ok(v) => v
                .parse::<usize>()
                .with_context(|| format!("Invalid MARKET_TOP_N: {}", v))?,
            Err(_) => defaults.top_n,
        };

        let request_timeout = match env::var("MARKET_REQUEST_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse::<u64>()
                    .with_context(|| format!("Invalid MARKET_REQUEST_TIMEOUT_SECS: {}", v))?,
            ),
            Err(_) => defaults.request_timeout,
        };

        Ok(Self {
            base_url: env::var("COINGECKO_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            api_key,
            vs_currency: env::var("MARKET_VS_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.vs_currency),
            top_n,
            request_timeout,
        })
    }
}
