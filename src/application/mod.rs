// Fetch orchestration, caching and live price polling
pub mod market_data;
