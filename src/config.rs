use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Maximum age of a cached list before it is refreshed again
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Cap on simultaneous provider calls across all sources
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_fetches: usize,
    /// Coordinator-level fetch timeout, 0 = rely on the provider only
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub refresh_on_startup: bool,
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_secs: u64,
    #[serde(default = "default_background_task_id")]
    pub background_task_id: String,
    /// Requested "earliest begin" offset for the next background wake-up
    #[serde(default = "default_background_earliest")]
    pub background_earliest_begin_secs: u64,
    /// Time budget the in-process host grants a background run
    #[serde(default = "default_background_budget")]
    pub background_budget_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    /// Enabled subset of the built-in registry; empty = all
    #[serde(default)]
    pub enabled: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_web_address")]
    pub address: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            max_concurrent_fetches: default_max_concurrent(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_on_startup: true,
            periodic_interval_secs: default_periodic_interval(),
            background_task_id: default_background_task_id(),
            background_earliest_begin_secs: default_background_earliest(),
            background_budget_secs: default_background_budget(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_provider_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_web_address(),
            port: default_web_port(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_ttl() -> u64 { 1800 }
fn default_max_concurrent() -> usize { 3 }
fn default_fetch_timeout() -> u64 { 30 }
fn default_periodic_interval() -> u64 { 1800 }
fn default_background_task_id() -> String { "hot-trends.refresh".to_string() }
fn default_background_earliest() -> u64 { 1800 }
fn default_background_budget() -> u64 { 30 }
fn default_storage_path() -> String { "data".to_string() }
fn default_base_url() -> String { "http://127.0.0.1:6688/api/hot".to_string() }
fn default_provider_timeout() -> u64 { 10_000 }
fn default_user_agent() -> String { format!("hot-trends/{}", env!("CARGO_PKG_VERSION")) }
fn default_web_address() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8054 }

impl EngineConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

impl SchedulerConfig {
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub fn background_earliest_begin(&self) -> Duration {
        Duration::from_secs(self.background_earliest_begin_secs)
    }

    pub fn background_budget(&self) -> Duration {
        Duration::from_secs(self.background_budget_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.engine.max_concurrent_fetches == 0 {
            anyhow::bail!("engine.max_concurrent_fetches must be at least 1");
        }
        if self.scheduler.periodic_interval_secs == 0 {
            anyhow::bail!("scheduler.periodic_interval_secs must be greater than 0");
        }
        if self.scheduler.background_task_id.is_empty() {
            anyhow::bail!("scheduler.background_task_id must not be empty");
        }
        if self.provider.timeout_ms == 0 {
            anyhow::bail!("provider.timeout_ms must be greater than 0");
        }
        Ok(())
    }
}
