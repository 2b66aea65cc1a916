//! In-process stand-in for an OS background task scheduler.
//!
//! Each task id may have at most one pending request; a new request
//! replaces the old one. When a request fires, the handler runs with a
//! fixed time budget and its expiration token is cancelled once the
//! budget runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduler::{BackgroundHost, BackgroundTaskHandler, TaskCompletion};

struct Pending {
    seq: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct HostState {
    handlers: HashMap<String, Arc<dyn BackgroundTaskHandler>>,
    pending: HashMap<String, Pending>,
    next_seq: u64,
}

pub struct TokioBackgroundHost {
    state: Arc<Mutex<HostState>>,
    budget: Duration,
    shutdown: CancellationToken,
}

impl TokioBackgroundHost {
    pub fn new(budget: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState::default())),
            budget,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Drop every pending request
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut state = self.state.lock();
        for (_, pending) in state.pending.drain() {
            pending.handle.abort();
        }
    }
}

impl BackgroundHost for TokioBackgroundHost {
    fn register(&self, task_id: &str, handler: Arc<dyn BackgroundTaskHandler>) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.handlers.contains_key(task_id) {
            anyhow::bail!("background task '{}' is already registered", task_id);
        }
        state.handlers.insert(task_id.to_string(), handler);
        Ok(())
    }

    fn schedule_next(&self, task_id: &str, earliest_begin: Duration) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            anyhow::bail!("background host is shut down");
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("no async runtime for background task: {}", e))?;

        let mut state = self.state.lock();
        let handler = state
            .handlers
            .get(task_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("background task '{}' is not registered", task_id))?;

        state.next_seq += 1;
        let seq = state.next_seq;
        let id = task_id.to_string();
        let budget = self.budget;
        let shutdown = self.shutdown.clone();
        let shared = self.state.clone();

        let handle = runtime.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(earliest_begin) => {}
            }

            // Fired: this request is no longer pending
            {
                let mut state = shared.lock();
                if state.pending.get(&id).map(|p| p.seq) == Some(seq) {
                    state.pending.remove(&id);
                }
            }

            let expiration = CancellationToken::new();
            let revoke = expiration.clone();
            let budget_timer = tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                revoke.cancel();
            });

            debug!("Background task '{}' running (budget: {:?})", id, budget);
            match handler.run(expiration).await {
                TaskCompletion::Completed => debug!("Background task '{}' completed", id),
                TaskCompletion::Expired => warn!("Background task '{}' ran out of budget", id),
            }
            budget_timer.abort();
        });

        if let Some(previous) = state.pending.insert(task_id.to_string(), Pending { seq, handle }) {
            previous.handle.abort();
        }
        info!("Background task '{}' scheduled in {:?}", task_id, earliest_begin);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingHandler {
        runs: AtomicUsize,
        wait_for_expiration: bool,
        expired: AtomicUsize,
    }

    #[async_trait]
    impl BackgroundTaskHandler for CountingHandler {
        async fn run(&self, expiration: CancellationToken) -> TaskCompletion {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.wait_for_expiration {
                expiration.cancelled().await;
                self.expired.fetch_add(1, Ordering::SeqCst);
                return TaskCompletion::Expired;
            }
            TaskCompletion::Completed
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_earliest_begin() {
        let host = TokioBackgroundHost::new(Duration::from_secs(30));
        let handler = Arc::new(CountingHandler::default());
        host.register("refresh", handler.clone()).unwrap();
        host.schedule_next("refresh", Duration::from_secs(60)).unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 0);
        assert_eq!(host.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(host.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_request_replaces_pending() {
        let host = TokioBackgroundHost::new(Duration::from_secs(30));
        let handler = Arc::new(CountingHandler::default());
        host.register("refresh", handler.clone()).unwrap();

        host.schedule_next("refresh", Duration::from_secs(10)).unwrap();
        host.schedule_next("refresh", Duration::from_secs(100)).unwrap();

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(51)).await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_expiration_is_signalled() {
        let host = TokioBackgroundHost::new(Duration::from_secs(5));
        let handler = Arc::new(CountingHandler {
            wait_for_expiration: true,
            ..CountingHandler::default()
        });
        host.register("refresh", handler.clone()).unwrap();
        host.schedule_next("refresh", Duration::from_secs(1)).unwrap();

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(handler.expired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_and_duplicate_ids() {
        let host = TokioBackgroundHost::new(Duration::from_secs(5));
        assert!(host.schedule_next("missing", Duration::from_secs(1)).is_err());

        let handler = Arc::new(CountingHandler::default());
        host.register("refresh", handler.clone()).unwrap();
        assert!(host.register("refresh", handler).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending() {
        let host = TokioBackgroundHost::new(Duration::from_secs(5));
        let handler = Arc::new(CountingHandler::default());
        host.register("refresh", handler.clone()).unwrap();
        host.schedule_next("refresh", Duration::from_secs(1)).unwrap();

        host.shutdown();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 0);
        assert!(host.schedule_next("refresh", Duration::from_secs(1)).is_err());
    }
}
