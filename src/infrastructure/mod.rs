pub mod coingecko;
pub mod event_bus;
pub mod http_client_factory;
pub mod mock;

pub use coingecko::CoinGeckoProvider;
pub use event_bus::{EventBus, Subscription};
pub use mock::MockMarketDataProvider;
