use tracing::warn;

/// A fetchable content source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub key: String,
    pub display_name: String,
}

/// Built-in platforms, in refresh order
const BUILTIN_SOURCES: &[(&str, &str)] = &[
    ("weibo", "Weibo"),
    ("zhihu", "Zhihu"),
    ("baidu", "Baidu"),
    ("douyin", "Douyin"),
    ("bilibili", "Bilibili"),
    ("toutiao", "Toutiao"),
    ("thepaper", "The Paper"),
    ("tieba", "Tieba"),
    ("hupu", "Hupu"),
    ("36kr", "36Kr"),
    ("ithome", "IT Home"),
    ("juejin", "Juejin"),
    ("v2ex", "V2EX"),
    ("github", "GitHub Trending"),
];

/// Static, ordered list of source identifiers. Immutable once built.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn builtin() -> Self {
        Self {
            sources: BUILTIN_SOURCES
                .iter()
                .map(|(key, name)| Source {
                    key: key.to_string(),
                    display_name: name.to_string(),
                })
                .collect(),
        }
    }

    /// Custom registry; duplicate keys keep their first position
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sources: Vec<Source> = Vec::new();
        for key in keys {
            let key = key.into();
            if sources.iter().any(|s| s.key == key) {
                continue;
            }
            let display_name = BUILTIN_SOURCES
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| key.clone());
            sources.push(Source { key, display_name });
        }
        Self { sources }
    }

    /// Built-in registry restricted to `enabled`, keeping built-in order.
    /// An empty list enables everything.
    pub fn with_enabled(enabled: &[String]) -> Self {
        let builtin = Self::builtin();
        if enabled.is_empty() {
            return builtin;
        }
        for key in enabled {
            if !builtin.contains(key) {
                warn!("Unknown source '{}' in configuration, ignoring", key);
            }
        }
        Self {
            sources: builtin
                .sources
                .into_iter()
                .filter(|s| enabled.iter().any(|k| *k == s.key))
                .collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sources.iter().any(|s| s.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.key.as_str())
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn display_name(&self, key: &str) -> Option<&str> {
        self.sources
            .iter()
            .find(|s| s.key == key)
            .map(|s| s.display_name.as_str())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order_is_stable() {
        let registry = SourceRegistry::builtin();
        let keys: Vec<&str> = registry.keys().collect();
        assert_eq!(keys.len(), 14);
        assert_eq!(keys[0], "weibo");
        assert_eq!(keys[13], "github");
        assert_eq!(registry.display_name("36kr"), Some("36Kr"));
    }

    #[test]
    fn test_from_keys_drops_duplicates() {
        let registry = SourceRegistry::from_keys(["b", "a", "b", "zhihu"]);
        let keys: Vec<&str> = registry.keys().collect();
        assert_eq!(keys, vec!["b", "a", "zhihu"]);
        assert_eq!(registry.display_name("a"), Some("a"));
        assert_eq!(registry.display_name("zhihu"), Some("Zhihu"));
    }

    #[test]
    fn test_enabled_subset_keeps_builtin_order() {
        let enabled = vec!["github".to_string(), "weibo".to_string(), "nope".to_string()];
        let registry = SourceRegistry::with_enabled(&enabled);
        let keys: Vec<&str> = registry.keys().collect();
        assert_eq!(keys, vec!["weibo", "github"]);
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_empty_enabled_means_all() {
        assert_eq!(SourceRegistry::with_enabled(&[]).len(), 14);
    }
}
