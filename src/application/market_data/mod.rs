// Market data fetch and cache modules
pub mod preload_scheduler;
pub mod price_poller;
pub mod retry_policy;
pub mod series_cache;
pub mod service;

pub use preload_scheduler::{BulkPreloadScheduler, FailedTask, PreloadReport};
pub use price_poller::{PollerSettings, PricePoller};
pub use retry_policy::{BackoffExecutor, RetryPolicy};
pub use series_cache::SeriesCache;
pub use service::MarketDataService;
