use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{CacheEvent, CacheStore};
use crate::config::{Config, EngineConfig, SchedulerConfig};
use crate::coordinator::{FetchCoordinator, RefreshOutcome, RefreshSummary};
use crate::metrics::MetricsCounters;
use crate::provider::ProviderClient;
use crate::scheduler::{BackgroundHost, RefreshScheduler};
use crate::storage::DurableStore;
use crate::trends::source::SourceRegistry;
use crate::trends::types::RankedList;

/// Per-source summary for listings
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub key: String,
    pub display_name: String,
    pub loading: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub item_count: usize,
    pub stale: bool,
}

/// Hot-trends engine - owns the cache, the fetch coordinator and the
/// refresh scheduler. Construct once, call [`start`](Self::start), and
/// read from any thread; reads never touch the network.
pub struct HotTrendsEngine {
    cache: Arc<CacheStore>,
    coordinator: Arc<FetchCoordinator>,
    scheduler: Arc<RefreshScheduler>,
    registry: Arc<SourceRegistry>,
    metrics: Arc<MetricsCounters>,
    shutdown: CancellationToken,
}

impl HotTrendsEngine {
    pub fn new(
        config: &Config,
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn DurableStore>,
        host: Option<Arc<dyn BackgroundHost>>,
    ) -> Self {
        let registry = SourceRegistry::with_enabled(&config.sources.enabled);
        Self::with_registry(registry, &config.engine, &config.scheduler, provider, store, host)
    }

    pub fn with_registry(
        registry: SourceRegistry,
        engine: &EngineConfig,
        scheduler: &SchedulerConfig,
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn DurableStore>,
        host: Option<Arc<dyn BackgroundHost>>,
    ) -> Self {
        // Restores the durable cache synchronously
        let cache = Arc::new(CacheStore::new(store));
        let registry = Arc::new(registry);
        let metrics = Arc::new(MetricsCounters::new());
        let shutdown = CancellationToken::new();

        let coordinator = Arc::new(FetchCoordinator::new(
            cache.clone(),
            provider,
            registry.clone(),
            metrics.clone(),
            engine,
            shutdown.clone(),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            coordinator.clone(),
            metrics.clone(),
            host,
            scheduler,
            shutdown.clone(),
        ));

        info!(
            "Engine initialized with {} sources (ttl: {:?}, max concurrent: {})",
            registry.len(),
            engine.ttl(),
            engine.max_concurrent_fetches
        );

        Self {
            cache,
            coordinator,
            scheduler,
            registry,
            metrics,
            shutdown,
        }
    }

    /// Startup refresh, periodic timer and background registration.
    /// Must be called inside a tokio runtime.
    pub fn start(&self) {
        self.scheduler.start();
    }

    pub fn get(&self, source_key: &str) -> Option<RankedList> {
        self.cache.get(source_key)
    }

    pub fn should_refresh(&self, source_key: &str) -> bool {
        self.cache.should_refresh(source_key, self.coordinator.ttl())
    }

    pub fn is_loading(&self, source_key: &str) -> bool {
        self.cache.is_loading(source_key)
    }

    pub fn last_update(&self, source_key: &str) -> Option<DateTime<Utc>> {
        self.cache.last_update(source_key)
    }

    /// Fire-and-forget; a no-op if the source is already loading.
    /// The handle may be dropped.
    pub fn refresh_one(&self, source_key: &str) -> JoinHandle<RefreshOutcome> {
        self.coordinator.spawn_refresh_one(source_key)
    }

    /// Fire-and-forget refresh of every stale source
    pub fn refresh_all(&self) -> JoinHandle<RefreshSummary> {
        self.coordinator.spawn_refresh_all()
    }

    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }

    /// "Entry updated" notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn metrics(&self) -> &MetricsCounters {
        &self.metrics
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }

    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        self.registry
            .sources()
            .iter()
            .map(|source| {
                let key = source.key.as_str();
                SourceStatus {
                    key: source.key.clone(),
                    display_name: source.display_name.clone(),
                    loading: self.cache.is_loading(key),
                    last_update: self.cache.last_update(key),
                    item_count: self.cache.item_count(key),
                    stale: self.should_refresh(key),
                }
            })
            .collect()
    }

    /// Get stats for the web API
    pub fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "sources": self.registry.len(),
            "ttl_secs": self.coordinator.ttl().as_secs(),
            "cache": self.cache.get_stats(),
            "refresh": self.metrics.get_stats(),
        })
    }

    /// Stop the periodic timer and cancel in-flight refreshes
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        self.scheduler.shutdown().await;
        self.coordinator.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::coordinator::tests::{Behavior, StubProvider};
    use crate::scheduler::tests::RecordingHost;
    use crate::storage::{FileStore, MemoryStore};

    fn engine_with(provider: Arc<StubProvider>, store: Arc<dyn DurableStore>, keys: &[&str]) -> HotTrendsEngine {
        HotTrendsEngine::with_registry(
            SourceRegistry::from_keys(keys.iter().copied()),
            &EngineConfig::default(),
            &SchedulerConfig {
                refresh_on_startup: false,
                ..SchedulerConfig::default()
            },
            provider,
            store,
            None,
        )
    }

    #[tokio::test]
    async fn test_refresh_then_read() {
        let provider = Arc::new(StubProvider::new(Behavior::Succeed { items: 3 }, Duration::ZERO));
        let engine = engine_with(provider.clone(), Arc::new(MemoryStore::new()), &["platformA"]);

        assert!(engine.get("platformA").is_none());
        assert!(engine.should_refresh("platformA"));

        let outcome = engine.refresh_one("platformA").await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Updated { items: 3 });

        let list = engine.get("platformA").unwrap();
        let titles: Vec<&str> = list.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["#1", "#2", "#3"]);
        assert!(!engine.should_refresh("platformA"));
        assert!(!engine.is_loading("platformA"));
        assert!(engine.last_update("platformA").is_some());
    }

    #[tokio::test]
    async fn test_failing_provider_yields_empty_list() {
        let provider = Arc::new(StubProvider::new(Behavior::Fail, Duration::ZERO));
        let engine = engine_with(provider, Arc::new(MemoryStore::new()), &["platformB"]);

        engine.refresh_one("platformB").await.unwrap();

        let list = engine.get("platformB").unwrap();
        assert_eq!(list.items.len(), 0);
        assert_eq!(list.total_count, 0);
        assert!(!engine.should_refresh("platformB"));
    }

    #[tokio::test]
    async fn test_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(StubProvider::new(Behavior::Succeed { items: 4 }, Duration::ZERO));

        let before = {
            let engine = engine_with(provider.clone(), Arc::new(FileStore::new(dir.path())), &["weibo", "zhihu"]);
            let summary = engine.refresh_all().await.unwrap();
            assert_eq!(summary.updated, 2);
            engine.shutdown().await;
            engine.get("zhihu").unwrap()
        };

        let engine = engine_with(provider.clone(), Arc::new(FileStore::new(dir.path())), &["weibo", "zhihu"]);
        assert_eq!(engine.get("zhihu"), Some(before));
        assert!(!engine.should_refresh("weibo"));

        // Restored entries are fresh, so nothing is fetched again
        let summary = engine.refresh_all().await.unwrap();
        assert_eq!(summary.attempted(), 0);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_cache_and_events() {
        let provider = Arc::new(StubProvider::new(Behavior::Succeed { items: 1 }, Duration::ZERO));
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(provider, store.clone(), &["github"]);
        let mut events = engine.subscribe();

        engine.refresh_one("github").await.unwrap();
        engine.clear_cache();

        assert!(engine.get("github").is_none());
        assert!(engine.should_refresh("github"));
        assert!(!store.contains(crate::cache::LISTS_BLOB));
        assert!(matches!(events.recv().await.unwrap(), CacheEvent::Updated { item_count: 1, .. }));
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Cleared);
    }

    #[tokio::test]
    async fn test_source_statuses() {
        let provider = Arc::new(StubProvider::new(Behavior::Succeed { items: 2 }, Duration::ZERO));
        let engine = engine_with(provider, Arc::new(MemoryStore::new()), &["weibo", "v2ex"]);
        engine.refresh_one("v2ex").await.unwrap();

        let statuses = engine.source_statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].key, "weibo");
        assert_eq!(statuses[0].display_name, "Weibo");
        assert!(statuses[0].stale);
        assert_eq!(statuses[1].item_count, 2);
        assert!(!statuses[1].stale);
        assert!(statuses[1].last_update.is_some());
    }

    #[tokio::test]
    async fn test_status_and_metrics_do_not_count_as_reads() {
        let provider = Arc::new(StubProvider::new(Behavior::Succeed { items: 2 }, Duration::ZERO));
        let engine = engine_with(provider, Arc::new(MemoryStore::new()), &["weibo", "v2ex"]);
        engine.refresh_one("v2ex").await.unwrap();

        engine.source_statuses();
        let text = crate::metrics::render_metrics(&engine);
        engine.get_stats();

        assert!(text.contains("hot_trends_cache_hits_total 0"));
        assert_eq!(engine.cache().hits(), 0);
        assert_eq!(engine.cache().misses(), 0);

        engine.get("v2ex");
        engine.get("weibo");
        assert_eq!(engine.cache().hits(), 1);
        assert_eq!(engine.cache().misses(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let provider = Arc::new(StubProvider::new(Behavior::Succeed { items: 1 }, Duration::from_millis(50)));
        let host = Arc::new(RecordingHost::default());
        let engine = HotTrendsEngine::with_registry(
            SourceRegistry::from_keys(["a", "b", "c", "d"]),
            &EngineConfig::default(),
            &SchedulerConfig::default(),
            provider.clone(),
            Arc::new(MemoryStore::new()),
            Some(host.clone()),
        );

        engine.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.calls(), 4);
        assert_eq!(host.registered.lock().len(), 1);
        assert_eq!(engine.metrics().startup_runs.load(std::sync::atomic::Ordering::Relaxed), 1);

        engine.shutdown().await;
        assert!(engine.is_shut_down());
        // After shutdown a refresh is accepted but never reaches the provider
        assert_eq!(engine.refresh_one("a").await.unwrap(), RefreshOutcome::Cancelled);
        assert!(!engine.is_loading("a"));
        assert_eq!(provider.calls(), 4);
    }
}
