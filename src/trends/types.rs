use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a ranked list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 1-based, dense within its list
    pub rank: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "imageURL", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source_key: String,
}

impl RankedItem {
    pub fn new(source_key: &str, rank: u32, id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            rank,
            hot_value: None,
            url: None,
            image_url: None,
            category: None,
            timestamp: Utc::now(),
            source_key: source_key.to_string(),
        }
    }
}

/// Ranked list for one source. Item order is the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedList {
    pub source_key: String,
    pub update_time: DateTime<Utc>,
    pub items: Vec<RankedItem>,
    /// Informational; may exceed `items.len()`
    pub total_count: usize,
}

impl RankedList {
    pub fn new(source_key: &str, items: Vec<RankedItem>) -> Self {
        let total_count = items.len();
        Self {
            source_key: source_key.to_string(),
            update_time: Utc::now(),
            items,
            total_count,
        }
    }

    /// "Checked, nothing available" - stored when a fetch fails
    pub fn empty(source_key: &str) -> Self {
        Self::new(source_key, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
