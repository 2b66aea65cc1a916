use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::{AbortOnDropHandle, TaskTracker};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::metrics::MetricsCounters;
use crate::provider::ProviderClient;
use crate::trends::source::SourceRegistry;
use crate::trends::types::RankedList;

/// Result of a single refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated { items: usize },
    /// Provider error, timeout or panic; an empty list was stored
    Failed,
    /// Another refresh for the same source was already in flight
    Skipped,
    /// Engine shut down before the fetch completed
    Cancelled,
}

/// Tally of one refresh-all pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RefreshSummary {
    fn record(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Updated { .. } => self.updated += 1,
            RefreshOutcome::Failed => self.failed += 1,
            RefreshOutcome::Skipped => self.skipped += 1,
            RefreshOutcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn attempted(&self) -> usize {
        self.updated + self.failed + self.cancelled
    }
}

/// Holds a source's loading flag; clears it on drop, including on
/// error, panic unwind and task abort.
struct LoadingGuard {
    cache: Arc<CacheStore>,
    source_key: String,
}

impl LoadingGuard {
    fn acquire(cache: &Arc<CacheStore>, source_key: &str) -> Option<Self> {
        cache.mark_loading(source_key).then(|| Self {
            cache: cache.clone(),
            source_key: source_key.to_string(),
        })
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.cache.clear_loading(&self.source_key);
    }
}

enum FetchEnd {
    Done(anyhow::Result<RankedList>),
    TimedOut(Duration),
    Cancelled,
}

/// Runs refreshes against the provider with a global cap on in-flight calls
pub struct FetchCoordinator {
    cache: Arc<CacheStore>,
    provider: Arc<dyn ProviderClient>,
    registry: Arc<SourceRegistry>,
    metrics: Arc<MetricsCounters>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    ttl: Duration,
    fetch_timeout: Option<Duration>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl FetchCoordinator {
    pub fn new(
        cache: Arc<CacheStore>,
        provider: Arc<dyn ProviderClient>,
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsCounters>,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let max_concurrent = config.max_concurrent_fetches.max(1);
        Self {
            cache,
            provider,
            registry,
            metrics,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            ttl: config.ttl(),
            fetch_timeout: config.fetch_timeout(),
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Refresh one source, waiting for a fetch slot.
    /// A no-op when the source is already loading.
    pub async fn refresh_one(&self, source_key: &str) -> RefreshOutcome {
        let Some(guard) = LoadingGuard::acquire(&self.cache, source_key) else {
            debug!("Refresh skipped for {}: already loading", source_key);
            self.metrics.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
            return RefreshOutcome::Skipped;
        };

        match self.acquire_permit().await {
            Some(permit) => self.run_fetch(guard, permit).await,
            None => RefreshOutcome::Cancelled,
        }
    }

    /// Refresh every stale source in registry order, at most
    /// `max_concurrent` provider calls at a time
    pub async fn refresh_all(self: &Arc<Self>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        let mut accepted = Vec::new();
        for key in self.registry.keys() {
            if !self.cache.should_refresh(key, self.ttl) {
                continue;
            }
            match LoadingGuard::acquire(&self.cache, key) {
                // Another refresh may have landed between the check and the mark
                Some(guard) if !self.cache.should_refresh(key, self.ttl) => drop(guard),
                Some(guard) => accepted.push(guard),
                None => {
                    debug!("Refresh skipped for {}: already loading", key);
                    self.metrics.refreshes_skipped.fetch_add(1, Ordering::Relaxed);
                    summary.skipped += 1;
                }
            }
        }

        if accepted.is_empty() {
            debug!("Refresh-all: nothing stale");
            return summary;
        }
        info!(
            "Refreshing {} sources (max {} concurrent)",
            accepted.len(),
            self.max_concurrent
        );

        let mut set = JoinSet::new();
        for guard in accepted {
            // Permits are taken in registry order, so initiation follows it too
            let Some(permit) = self.acquire_permit().await else {
                summary.cancelled += 1;
                continue;
            };
            let this = self.clone();
            set.spawn(async move { this.run_fetch(guard, permit).await });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    warn!("Refresh task ended abnormally: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Refresh-all done: {} updated, {} failed, {} skipped, {} cancelled",
            summary.updated, summary.failed, summary.skipped, summary.cancelled
        );
        summary
    }

    /// Fire-and-forget variant of [`refresh_one`](Self::refresh_one)
    pub fn spawn_refresh_one(self: &Arc<Self>, source_key: &str) -> JoinHandle<RefreshOutcome> {
        let this = self.clone();
        let key = source_key.to_string();
        self.tasks.spawn(async move { this.refresh_one(&key).await })
    }

    /// Fire-and-forget variant of [`refresh_all`](Self::refresh_all)
    pub fn spawn_refresh_all(self: &Arc<Self>) -> JoinHandle<RefreshSummary> {
        let this = self.clone();
        self.tasks.spawn(async move { this.refresh_all().await })
    }

    /// Cancel in-flight work and wait for spawned refreshes to settle
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        }
    }

    async fn run_fetch(&self, guard: LoadingGuard, _permit: OwnedSemaphorePermit) -> RefreshOutcome {
        let key = guard.source_key.clone();
        self.metrics.refreshes_started.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        // Own task, so a provider panic comes back as a JoinError.
        // Aborted on drop: no call outlives its loading flag and permit.
        let provider = self.provider.clone();
        let fetch_key = key.clone();
        let handle = AbortOnDropHandle::new(tokio::spawn(async move { provider.fetch(&fetch_key).await }));
        let joined = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(anyhow::anyhow!("provider panicked")),
                Err(e) => Err(anyhow::anyhow!("provider task failed: {}", e)),
            }
        };

        let end = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => FetchEnd::Cancelled,
            end = bounded(self.fetch_timeout, joined) => end,
        };

        let outcome = match end {
            FetchEnd::Done(Ok(mut list)) => {
                list.source_key = key.clone();
                let items = list.items.len();
                self.cache.put(&key, list);
                self.metrics.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
                debug!("Refreshed {} ({} items, {:?})", key, items, start.elapsed());
                RefreshOutcome::Updated { items }
            }
            FetchEnd::Done(Err(e)) => {
                warn!("Fetch failed for {}: {}", key, e);
                self.record_failure(&key);
                RefreshOutcome::Failed
            }
            FetchEnd::TimedOut(limit) => {
                warn!("Fetch for {} timed out after {:?}", key, limit);
                self.record_failure(&key);
                RefreshOutcome::Failed
            }
            FetchEnd::Cancelled => {
                debug!("Fetch for {} cancelled by shutdown", key);
                RefreshOutcome::Cancelled
            }
        };

        if outcome != RefreshOutcome::Cancelled {
            self.metrics.record_fetch_latency(start.elapsed().as_micros() as u64);
        }

        // put happens-before clear_loading
        drop(guard);
        outcome
    }

    fn record_failure(&self, source_key: &str) {
        self.cache.put_failure(source_key);
        self.metrics.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }
}

async fn bounded<F>(limit: Option<Duration>, fetch: F) -> FetchEnd
where
    F: std::future::Future<Output = anyhow::Result<RankedList>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fetch).await {
            Ok(result) => FetchEnd::Done(result),
            Err(_) => FetchEnd::TimedOut(limit),
        },
        None => FetchEnd::Done(fetch.await),
    }
}
