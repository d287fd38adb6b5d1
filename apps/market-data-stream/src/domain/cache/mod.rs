//! Snapshot Cache
//!
//! Holds one full snapshot of keyed items together with the time it was taken.
//! The snapshot is replaced wholesale on every update; there is no merging.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

/// Default refresh period for cached reference data.
pub const DEFAULT_UPDATE_PERIOD: TimeDelta = TimeDelta::hours(6);

/// Keyed snapshot with staleness tracking.
///
/// # Example
///
/// ```rust
/// use market_data_stream::domain::cache::Cache;
///
/// let mut cache = Cache::default();
/// assert!(cache.is_stale());
///
/// cache.update(vec!["BTCUSDT".to_string()], |ticker| ticker.clone());
/// assert!(!cache.is_stale());
/// assert!(cache.get("BTCUSDT").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct Cache<T> {
    update_period: TimeDelta,
    last_updated: Option<DateTime<Utc>>,
    items: HashMap<String, T>,
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_PERIOD)
    }
}

impl<T> Cache<T> {
    /// Create an empty cache with the given refresh period.
    #[must_use]
    pub fn new(update_period: TimeDelta) -> Self {
        Self {
            update_period,
            last_updated: None,
            items: HashMap::new(),
        }
    }

    /// Replace the snapshot, keying each item with `key`.
    pub fn update<I, K>(&mut self, items: I, key: K)
    where
        I: IntoIterator<Item = T>,
        K: Fn(&T) -> String,
    {
        self.update_at(items, key, Utc::now());
    }

    /// Replace the snapshot as if refreshed at `now`.
    pub fn update_at<I, K>(&mut self, items: I, key: K, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = T>,
        K: Fn(&T) -> String,
    {
        self.items = items.into_iter().map(|item| (key(&item), item)).collect();
        self.last_updated = Some(now);
    }

    /// Whether the snapshot is missing or older than the refresh period.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Staleness relative to `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.last_updated
            .is_none_or(|updated| now - updated > self.update_period)
    }

    /// Look up an item by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    /// Iterate over the snapshot.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Number of cached items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Time of the last update.
    #[must_use]
    pub const fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Configured refresh period.
    #[must_use]
    pub const fn update_period(&self) -> TimeDelta {
        self.update_period
    }
}
