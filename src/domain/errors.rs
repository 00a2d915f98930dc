use thiserror::Error;

/// Errors raised while talking to the upstream market-data API
#[derive(Debug, Clone, Error)]
pub enum MarketDataError {
    #[error("Rate limit exceeded (HTTP 429)")]
    RateLimited,

    #[error("Upstream returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Network failure: {reason}")]
    Network { reason: String },

    #[error("Malformed payload: {reason}")]
    Decode { reason: String },

    #[error("Upstream returned no usable data")]
    EmptyResult,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<MarketDataError>,
    },
}

impl MarketDataError {
    /// Whether another attempt may succeed. Any non-2xx status counts: the
    /// upstream is flaky enough that availability wins over fast failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketDataError::RateLimited
                | MarketDataError::HttpStatus { .. }
                | MarketDataError::Network { .. }
        )
    }

    /// Classifies a non-success HTTP status code
    pub fn from_status(status: u16) -> Self {
        if status == 429 {
            MarketDataError::RateLimited
        } else {
            MarketDataError::HttpStatus { status }
        }
    }
}
