use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::storage::DurableStore;
use crate::trends::types::RankedList;

/// Blob holding `source key -> RankedList`
pub const LISTS_BLOB: &str = "cached_lists";
/// Blob holding `source key -> last update time`
pub const TIMES_BLOB: &str = "last_update_times";

const EVENT_CAPACITY: usize = 64;

/// Per-source state. All three facts live behind the same shard lock.
#[derive(Clone, Debug, Default)]
struct CacheEntry {
    list: Option<RankedList>,
    last_update: Option<DateTime<Utc>>,
    loading: bool,
}

/// Published on every cache mutation
#[derive(Clone, Debug, PartialEq)]
pub enum CacheEvent {
    Updated {
        source_key: String,
        item_count: usize,
        failed: bool,
    },
    Cleared,
}

pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
    store: Arc<dyn DurableStore>,
    // Serializes snapshot + write so an older snapshot never lands last
    persist_lock: Mutex<()>,
    events: broadcast::Sender<CacheEvent>,
    // Stats
    hits: AtomicU64,
    misses: AtomicU64,
    persist_failures: AtomicU64,
}

impl CacheStore {
    /// Create the store and restore whatever the durable backend holds
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cache = Self {
            entries: DashMap::new(),
            store,
            persist_lock: Mutex::new(()),
            events,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        };
        cache.restore();
        cache
    }

    /// Last cached list, if the source was ever fetched
    pub fn get(&self, source_key: &str) -> Option<RankedList> {
        let list = self
            .entries
            .get(source_key)
            .and_then(|entry| entry.list.clone());
        if list.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        list
    }

    /// Item count of the cached list; not counted as a read
    pub fn item_count(&self, source_key: &str) -> usize {
        self.entries
            .get(source_key)
            .and_then(|entry| entry.list.as_ref().map(|l| l.items.len()))
            .unwrap_or(0)
    }

    pub fn last_update(&self, source_key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(source_key).and_then(|entry| entry.last_update)
    }

    pub fn is_loading(&self, source_key: &str) -> bool {
        self.entries
            .get(source_key)
            .map(|entry| entry.loading)
            .unwrap_or(false)
    }

    pub fn should_refresh(&self, source_key: &str, ttl: Duration) -> bool {
        self.should_refresh_at(source_key, ttl, Utc::now())
    }

    /// True when never updated or `now - last_update > ttl`
    pub fn should_refresh_at(&self, source_key: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.last_update(source_key) {
            None => true,
            // A timestamp in the future (clock skew) counts as fresh
            Some(last) => match now.signed_duration_since(last).to_std() {
                Ok(age) => age > ttl,
                Err(_) => false,
            },
        }
    }

    /// Replace the cached list, stamp it with now, write through
    pub fn put(&self, source_key: &str, list: RankedList) {
        self.store_entry(source_key, list, Utc::now(), false);
    }

    /// Record a failed fetch as "checked, nothing available"
    pub fn put_failure(&self, source_key: &str) {
        self.store_entry(source_key, RankedList::empty(source_key), Utc::now(), true);
    }

    pub(crate) fn put_at(&self, source_key: &str, list: RankedList, at: DateTime<Utc>) {
        self.store_entry(source_key, list, at, false);
    }

    fn store_entry(&self, source_key: &str, list: RankedList, at: DateTime<Utc>, failed: bool) {
        let item_count = list.items.len();
        {
            let mut entry = self.entries.entry(source_key.to_string()).or_default();
            entry.list = Some(list);
            entry.last_update = Some(at);
        }
        debug!("Cache updated: {} ({} items, failed: {})", source_key, item_count, failed);

        self.persist();
        // No subscribers is fine
        let _ = self.events.send(CacheEvent::Updated {
            source_key: source_key.to_string(),
            item_count,
            failed,
        });
    }

    /// Atomic check-and-set. `false` means a refresh is already in flight.
    pub fn mark_loading(&self, source_key: &str) -> bool {
        let mut entry = self.entries.entry(source_key.to_string()).or_default();
        if entry.loading {
            false
        } else {
            entry.loading = true;
            true
        }
    }

    pub fn clear_loading(&self, source_key: &str) {
        if let Some(mut entry) = self.entries.get_mut(source_key) {
            entry.loading = false;
        }
    }

    /// Write both blobs. Failures are logged and swallowed.
    pub fn persist(&self) {
        if let Err(e) = self.try_persist() {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to persist cache: {}", e);
        }
    }

    fn try_persist(&self) -> anyhow::Result<()> {
        let _guard = self.persist_lock.lock();

        let mut lists: BTreeMap<String, RankedList> = BTreeMap::new();
        let mut times: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for entry in self.entries.iter() {
            if let Some(list) = &entry.list {
                lists.insert(entry.key().clone(), list.clone());
            }
            if let Some(at) = entry.last_update {
                times.insert(entry.key().clone(), at);
            }
        }

        let lists_blob = serde_json::to_vec(&lists)?;
        let times_blob = serde_json::to_vec(&times)?;
        self.store.save(LISTS_BLOB, &lists_blob)?;
        self.store.save(TIMES_BLOB, &times_blob)?;
        Ok(())
    }

    /// Load both blobs. Missing or corrupt blobs count as empty.
    pub fn restore(&self) {
        let lists: BTreeMap<String, RankedList> = self.load_blob(LISTS_BLOB);
        let times: BTreeMap<String, DateTime<Utc>> = self.load_blob(TIMES_BLOB);

        let restored = lists.len();
        for (key, list) in lists {
            let mut entry = self.entries.entry(key).or_default();
            entry.list = Some(list);
        }
        for (key, at) in times {
            let mut entry = self.entries.entry(key).or_default();
            entry.last_update = Some(at);
        }

        if restored > 0 {
            info!("Restored {} cached lists", restored);
        }
    }

    fn load_blob<T: serde::de::DeserializeOwned + Default>(&self, name: &str) -> T {
        match self.store.load(name) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Corrupt cache blob '{}', starting empty: {}", name, e);
                T::default()
            }),
            Ok(None) => T::default(),
            Err(e) => {
                warn!("Failed to load cache blob '{}': {}", name, e);
                T::default()
            }
        }
    }

    /// Drop every cached list and delete the durable blobs.
    /// In-flight loading flags are kept so de-duplication still holds.
    pub fn clear_all(&self) {
        {
            let _guard = self.persist_lock.lock();
            self.entries.retain(|_, entry| entry.loading);
            for mut entry in self.entries.iter_mut() {
                entry.list = None;
                entry.last_update = None;
            }
            for name in [LISTS_BLOB, TIMES_BLOB] {
                if let Err(e) = self.store.remove(name) {
                    self.persist_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Failed to remove cache blob '{}': {}", name, e);
                }
            }
        }
        info!("Cache cleared");
        let _ = self.events.send(CacheEvent::Cleared);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Get cache stats for the web API
    pub fn get_stats(&self) -> serde_json::Value {
        let cached = self.entries.iter().filter(|e| e.list.is_some()).count();
        let loading = self.entries.iter().filter(|e| e.loading).count();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 * 100.0 } else { 0.0 };

        serde_json::json!({
            "cached_sources": cached,
            "loading": loading,
            "hits": hits,
            "misses": misses,
            "hit_rate_percent": format!("{:.1}", hit_rate),
            "persist_failures": self.persist_failures.load(Ordering::Relaxed),
        })
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }
}
