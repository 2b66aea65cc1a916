pub mod background;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod trends;
pub mod web;

pub use cache::{CacheEvent, CacheStore};
pub use config::Config;
pub use coordinator::{RefreshOutcome, RefreshSummary};
pub use provider::{HttpProvider, ProviderClient};
pub use scheduler::{BackgroundHost, BackgroundTaskHandler, TaskCompletion};
pub use storage::{DurableStore, FileStore, MemoryStore};
pub use trends::engine::HotTrendsEngine;
pub use trends::source::SourceRegistry;
pub use trends::types::{RankedItem, RankedList};
