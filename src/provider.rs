use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::trends::types::{RankedItem, RankedList};

/// Fetches the current ranked list for one source
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn fetch(&self, source_key: &str) -> anyhow::Result<RankedList>;
}

/// HTTP/JSON provider: `GET {base_url}/{source_key}`
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    items: Vec<ProviderItem>,
}

#[derive(Debug, Deserialize)]
struct ProviderItem {
    #[serde(default)]
    id: Option<serde_json::Value>,
    title: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    hot: Option<serde_json::Value>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    cover: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, source_key: &str) -> String {
        format!("{}/{}", self.base_url, source_key)
    }
}

#[async_trait]
impl ProviderClient for HttpProvider {
    async fn fetch(&self, source_key: &str) -> anyhow::Result<RankedList> {
        let url = self.url_for(source_key);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{} returned HTTP {}", url, status);
        }

        let body = response.bytes().await?;
        let list = parse_response(source_key, &body)?;
        debug!("Fetched {} items for {}", list.items.len(), source_key);
        Ok(list)
    }
}

/// Convert a provider body into a ranked list, re-ranking densely 1..n
fn parse_response(source_key: &str, body: &[u8]) -> anyhow::Result<RankedList> {
    let parsed: ProviderResponse = serde_json::from_slice(body)
        .map_err(|e| anyhow::anyhow!("Malformed response for {}: {}", source_key, e))?;

    let items: Vec<RankedItem> = parsed
        .items
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let rank = i as u32 + 1;
            let id = raw
                .id
                .as_ref()
                .and_then(value_to_string)
                .unwrap_or_else(|| format!("{}-{}", source_key, rank));
            let mut item = RankedItem::new(source_key, rank, id, raw.title);
            item.description = raw.desc.filter(|d| !d.is_empty());
            item.hot_value = raw.hot.as_ref().and_then(value_to_string);
            item.url = raw.url;
            item.image_url = raw.cover;
            item.category = raw.category;
            item
        })
        .collect();

    let mut list = RankedList::new(source_key, items);
    if let Some(total) = parsed.total {
        list.total_count = total;
    }
    Ok(list)
}

fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
