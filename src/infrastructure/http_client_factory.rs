use reqwest::Client;
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates a plain HTTP client. Retries are layered on by the callers,
    /// which need to classify failures and honour cancellation themselves.
    pub fn create_client(request_timeout: Duration) -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}
