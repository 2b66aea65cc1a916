use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::coordinator::FetchCoordinator;
use crate::metrics::MetricsCounters;

/// How a background run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletion {
    Completed,
    /// Time budget revoked before the refresh finished
    Expired,
}

/// Work invoked by a deferred-execution host
#[async_trait]
pub trait BackgroundTaskHandler: Send + Sync {
    /// `expiration` is cancelled when the host revokes the time budget
    async fn run(&self, expiration: CancellationToken) -> TaskCompletion;
}

/// OS-level deferred-execution facility supplied by the host application
pub trait BackgroundHost: Send + Sync {
    fn register(&self, task_id: &str, handler: Arc<dyn BackgroundTaskHandler>) -> anyhow::Result<()>;
    /// Request the next run no earlier than `earliest_begin` from now
    fn schedule_next(&self, task_id: &str, earliest_begin: Duration) -> anyhow::Result<()>;
}

/// Drives refresh-all passes from three triggers: startup, a repeating
/// interval, and background wake-ups from a [`BackgroundHost`].
pub struct RefreshScheduler {
    coordinator: Arc<FetchCoordinator>,
    metrics: Arc<MetricsCounters>,
    host: Option<Arc<dyn BackgroundHost>>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

/// Registered with the host. Weak so the host never keeps the engine alive.
struct BackgroundRefresh {
    scheduler: Weak<RefreshScheduler>,
}

#[async_trait]
impl BackgroundTaskHandler for BackgroundRefresh {
    async fn run(&self, expiration: CancellationToken) -> TaskCompletion {
        match self.scheduler.upgrade() {
            Some(scheduler) => scheduler.handle_background_task(expiration).await,
            None => {
                debug!("Background wake-up after engine drop, ignoring");
                TaskCompletion::Completed
            }
        }
    }
}

impl RefreshScheduler {
    pub fn new(
        coordinator: Arc<FetchCoordinator>,
        metrics: Arc<MetricsCounters>,
        host: Option<Arc<dyn BackgroundHost>>,
        config: &SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            metrics,
            host,
            config: config.clone(),
            shutdown,
            periodic: Mutex::new(None),
        }
    }

    /// Fire the startup trigger, start the periodic timer and register
    /// the background hook
    pub fn start(self: &Arc<Self>) {
        if self.config.refresh_on_startup {
            self.metrics.startup_runs.fetch_add(1, Ordering::Relaxed);
            info!("Startup refresh triggered");
            self.coordinator.spawn_refresh_all();
        }

        self.start_periodic();
        self.register_background();
    }

    fn start_periodic(self: &Arc<Self>) {
        let mut slot = self.periodic.lock();
        if slot.is_some() {
            return;
        }

        let period = self.config.periodic_interval();
        let coordinator = self.coordinator.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();
        info!("Periodic refresh started (interval: {:?})", period);

        *slot = Some(tokio::spawn(async move {
            // The startup trigger covers t=0
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        metrics.periodic_runs.fetch_add(1, Ordering::Relaxed);
                        debug!("Periodic refresh tick");
                        coordinator.refresh_all().await;
                    }
                }
            }
            debug!("Periodic refresh stopped");
        }));
    }

    fn register_background(self: &Arc<Self>) {
        let Some(host) = &self.host else {
            return;
        };
        let handler = Arc::new(BackgroundRefresh {
            scheduler: Arc::downgrade(self),
        });
        match host.register(&self.config.background_task_id, handler) {
            Ok(()) => {
                info!("Background task '{}' registered", self.config.background_task_id);
                self.schedule_next();
            }
            Err(e) => warn!(
                "Failed to register background task '{}': {}",
                self.config.background_task_id, e
            ),
        }
    }

    /// Background wake-up: refresh, honour expiration, then re-register
    pub async fn handle_background_task(&self, expiration: CancellationToken) -> TaskCompletion {
        self.metrics.background_runs.fetch_add(1, Ordering::Relaxed);
        info!("Background refresh started");

        let completion = tokio::select! {
            biased;
            _ = expiration.cancelled() => TaskCompletion::Expired,
            _ = self.shutdown.cancelled() => TaskCompletion::Expired,
            _ = self.coordinator.refresh_all() => TaskCompletion::Completed,
        };

        if completion == TaskCompletion::Expired {
            self.metrics.background_expired.fetch_add(1, Ordering::Relaxed);
            warn!("Background refresh expired before completion");
        }

        // Keep the chain going even when this run was cut short
        if !self.shutdown.is_cancelled() {
            self.schedule_next();
        }
        completion
    }

    fn schedule_next(&self) {
        let Some(host) = &self.host else {
            return;
        };
        let earliest = self.config.background_earliest_begin();
        match host.schedule_next(&self.config.background_task_id, earliest) {
            Ok(()) => debug!("Next background refresh requested in {:?}", earliest),
            Err(e) => {
                self.metrics.reschedule_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to schedule background refresh: {}", e);
            }
        }
    }

    /// Stop the periodic timer. In-flight refreshes are cancelled through
    /// the shared shutdown token.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.periodic.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Periodic refresh task ended abnormally: {}", e);
            }
        }
    }
}
