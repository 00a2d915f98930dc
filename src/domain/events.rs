use crate::domain::assets::Interval;
use std::collections::HashMap;

/// Notifications emitted while the cache is being populated
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The asset's primary (shortest) interval is cached, or definitively failed
    AssetReady { asset_id: String, success: bool },
    /// Every asset now has a cached series for this interval
    IntervalComplete { interval: Interval, success: bool },
}

/// Full copy of the poller's live maps after a successful tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceUpdate {
    pub prices: HashMap<String, f64>,
    pub changes: HashMap<String, f64>,
}

/// Receives events on whichever task produced them. Implementations that
/// drive a UI are responsible for marshalling onto their own event loop.
pub trait EventListener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Listener that only logs, handy for headless runs
pub struct LoggingListener;

impl EventListener<ProgressEvent> for LoggingListener {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::AssetReady { asset_id, success } => {
                tracing::info!("Progress: asset {} ready (success={})", asset_id, success);
            }
            ProgressEvent::IntervalComplete { interval, success } => {
                tracing::info!(
                    "Progress: interval {} complete across all assets (success={})",
                    interval,
                    success
                );
            }
        }
    }
}

impl EventListener<PriceUpdate> for LoggingListener {
    fn on_event(&self, event: &PriceUpdate) {
        tracing::debug!("Progress: received {} live prices", event.prices.len());
    }
}
