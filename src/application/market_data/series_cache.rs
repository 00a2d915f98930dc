use crate::domain::assets::{AssetSnapshot, HistoricalSeries, Interval};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct CacheState {
    // Never Some(empty)
    snapshot: Option<Vec<AssetSnapshot>>,
    series: HashMap<String, HashMap<Interval, HistoricalSeries>>,
}

/// In-memory store for the top-assets snapshot and per (asset, interval)
/// historical series.
///
/// Snapshot and series live behind one lock so `clear()` is atomic with
/// respect to readers. The lock is never held across an `.await`.
pub struct SeriesCache {
    state: RwLock<CacheState>,
}

// Manual Debug implementation for SeriesCache
impl std::fmt::Debug for SeriesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesCache")
            .field("state", &"<RwLock>")
            .finish()
    }
}

impl SeriesCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("SeriesCache: Lock poisoned during read, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("SeriesCache: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Store the snapshot list. An empty list is ignored so it can never
    /// replace a populated snapshot. Returns whether the cache was updated.
    pub fn put_snapshot(&self, assets: Vec<AssetSnapshot>) -> bool {
        if assets.is_empty() {
            tracing::debug!("SeriesCache: Ignoring empty snapshot");
            return false;
        }
        self.write().snapshot = Some(assets);
        true
    }

    /// Copy of the cached snapshot, empty if none is cached
    pub fn get_snapshot(&self) -> Vec<AssetSnapshot> {
        self.read().snapshot.clone().unwrap_or_default()
    }

    pub fn has_snapshot(&self) -> bool {
        self.read().snapshot.is_some()
    }

    /// Store a series. A blank asset id or an empty series is a no-op, so a
    /// fetch that produced no points never reads back as "has data".
    pub fn put_series(&self, asset_id: &str, interval: Interval, series: HistoricalSeries) -> bool {
        if asset_id.trim().is_empty() || series.is_empty() {
            return false;
        }
        self.write()
            .series
            .entry(asset_id.to_string())
            .or_default()
            .insert(interval, series);
        true
    }

    pub fn get_series(&self, asset_id: &str, interval: Interval) -> Option<HistoricalSeries> {
        self.read()
            .series
            .get(asset_id)
            .and_then(|by_interval| by_interval.get(&interval))
            .cloned()
    }

    pub fn has_series(&self, asset_id: &str, interval: Interval) -> bool {
        self.read()
            .series
            .get(asset_id)
            .is_some_and(|by_interval| by_interval.contains_key(&interval))
    }

    /// Number of cached (asset, interval) series
    pub fn series_count(&self) -> usize {
        self.read().series.values().map(HashMap::len).sum()
    }

    /// Drop the snapshot and every series in one step
    pub fn clear(&self) {
        let mut guard = self.write();
        guard.snapshot = None;
        guard.series.clear();
    }
}

impl Default for SeriesCache {
    fn default() -> Self {
        Self::new()
    }
}
