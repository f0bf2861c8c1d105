//! Search configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Search service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Path to the search index directory; the index lives in RAM when unset
    pub index_path: Option<PathBuf>,

    /// Index writer heap size in bytes (default: 50MB)
    pub writer_heap_size: usize,

    /// Maximum search results to return for one request
    pub max_results: usize,

    /// Results per page
    pub page_size: usize,

    /// Cache built query templates per model
    pub enable_query_cache: bool,

    /// Per-category factor applied to the bad results threshold
    pub bad_score_multipliers: HashMap<String, f64>,

    /// Search settings supplied by the config file (flat `__` keys)
    pub settings: HashMap<String, String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            writer_heap_size: 50_000_000, // 50MB
            max_results: 1000,
            page_size: 20,
            enable_query_cache: true,
            bad_score_multipliers: HashMap::new(),
            settings: HashMap::new(),
        }
    }
}

impl SearchConfig {
    /// Multiplier for a category's bad results threshold (1.0 when not configured)
    pub fn bad_score_multiplier(&self, category: &str) -> f64 {
        self.bad_score_multipliers
            .get(category)
            .copied()
            .unwrap_or(1.0)
    }
}

/// Builder for SearchConfig
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    pub fn index_path(mut self, path: PathBuf) -> Self {
        self.config.index_path = Some(path);
        self
    }

    pub fn writer_heap_size(mut self, size: usize) -> Self {
        self.config.writer_heap_size = size;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn enable_query_cache(mut self, enabled: bool) -> Self {
        self.config.enable_query_cache = enabled;
        self
    }

    pub fn bad_score_multiplier(mut self, category: impl Into<String>, multiplier: f64) -> Self {
        self.config
            .bad_score_multipliers
            .insert(category.into(), multiplier);
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.settings.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> SearchConfig {
        self.config
    }
}

impl Default for SearchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = SearchConfigBuilder::new()
            .page_size(5)
            .bad_score_multiplier("people", 2.0)
            .setting("boost_parts__query_types__phrase", "12")
            .build();

        assert_eq!(config.page_size, 5);
        assert_eq!(config.bad_score_multiplier("people"), 2.0);
        assert_eq!(config.bad_score_multiplier("teams"), 1.0);
        assert!(config.index_path.is_none());
    }
}
