//! Layered search settings
//!
//! Settings are flat `__`-separated keys such as
//! `boost_parts__query_types__phrase`. Lookups walk the layers from highest to
//! lowest priority: runtime overrides held in the [`SettingStore`], process
//! environment (`SEARCH_EXTENDED__<key>`), boosts declared on indexed fields,
//! the config file and finally the built-in defaults.

use crate::search::error::{SearchError, SearchResult};
use crate::search::types::{AnalysisType, SearchQueryType};
use crate::state::SettingStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strum::Display;
use tracing::{debug, info, warn};

/// Prefix of environment variables that override search settings
pub const ENV_PREFIX: &str = "SEARCH_EXTENDED";

/// Key fragment shared by every boost setting
pub const BOOST_PARTS: &str = "boost_parts";

const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("boost_parts__query_types__phrase", "10.0"),
    ("boost_parts__query_types__query_and", "2.5"),
    ("boost_parts__query_types__query_or", "1.0"),
    ("boost_parts__query_types__fuzzy", "1.0"),
    ("boost_parts__analyzers__explicit", "3.5"),
    ("boost_parts__analyzers__tokenized", "1.0"),
    ("analyzers__tokenized__es_analyzer", "snowball"),
    ("analyzers__tokenized__index_fieldname_suffix", ""),
    ("analyzers__tokenized__query_types", "phrase,query_and,query_or"),
    ("analyzers__explicit__es_analyzer", "simple"),
    ("analyzers__explicit__index_fieldname_suffix", "_explicit"),
    ("analyzers__explicit__query_types", "phrase,query_and,query_or"),
    ("analyzers__keyword__es_analyzer", "no_spaces"),
    ("analyzers__keyword__index_fieldname_suffix", "_keyword"),
    ("analyzers__keyword__query_types", "phrase"),
    ("analyzers__proximity__es_analyzer", "keyword"),
    ("analyzers__proximity__index_fieldname_suffix", "_proximity"),
];

/// Where the effective value of a setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SettingSource {
    Default,
    File,
    Fields,
    Env,
    Runtime,
}

/// A setting with its effective value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    pub source: SettingSource,
}

#[derive(Debug, Default)]
struct Layers {
    defaults: BTreeMap<String, String>,
    file: BTreeMap<String, String>,
    fields: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    runtime: BTreeMap<String, String>,
}

impl Layers {
    /// Highest priority first
    fn ordered(&self) -> [(SettingSource, &BTreeMap<String, String>); 5] {
        [
            (SettingSource::Runtime, &self.runtime),
            (SettingSource::Env, &self.env),
            (SettingSource::Fields, &self.fields),
            (SettingSource::File, &self.file),
            (SettingSource::Default, &self.defaults),
        ]
    }

    fn lookup(&self, key: &str) -> Option<(&str, SettingSource)> {
        self.ordered()
            .into_iter()
            .find_map(|(source, layer)| layer.get(key).map(|v| (v.as_str(), source)))
    }
}

/// Search settings shared by the query builder and the explore endpoints
pub struct SearchSettings {
    layers: RwLock<Layers>,
    store: Arc<dyn SettingStore>,
    version: AtomicU64,
}

impl SearchSettings {
    /// Build the settings from every layer, reading the environment of the process
    pub async fn load(
        file: &HashMap<String, String>,
        field_boosts: BTreeMap<String, String>,
        store: Arc<dyn SettingStore>,
    ) -> SearchResult<Self> {
        let env = env_settings(None)?;
        Self::with_env(file, field_boosts, env, store).await
    }

    /// Build the settings with an explicit environment layer
    pub async fn with_env(
        file: &HashMap<String, String>,
        field_boosts: BTreeMap<String, String>,
        env: BTreeMap<String, String>,
        store: Arc<dyn SettingStore>,
    ) -> SearchResult<Self> {
        let layers = Layers {
            defaults: DEFAULT_SETTINGS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            file: file.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            fields: field_boosts,
            env,
            runtime: BTreeMap::new(),
        };

        let settings = Self {
            layers: RwLock::new(layers),
            store,
            version: AtomicU64::new(0),
        };
        settings.refresh().await?;
        Ok(settings)
    }

    /// Reload runtime overrides from the store
    pub async fn refresh(&self) -> SearchResult<()> {
        let runtime: BTreeMap<String, String> =
            self.store.list_settings().await?.into_iter().collect();
        debug!(count = runtime.len(), "Loaded runtime search settings");
        self.layers.write().runtime = runtime;
        self.bump();
        Ok(())
    }

    /// Changes each time any layer changes; query templates are keyed on it
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.layers.read().lookup(key).map(|(v, _)| v.to_string())
    }

    pub fn get_with_source(&self, key: &str) -> Option<SettingEntry> {
        self.layers.read().lookup(key).map(|(value, source)| SettingEntry {
            key: key.to_string(),
            value: value.to_string(),
            source,
        })
    }

    /// Numeric setting; unset, empty and unparsable values all read as `None`
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let raw = self.get(key)?;
        if raw.trim().is_empty() {
            return None;
        }
        match raw.trim().parse::<f64>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key = %key, value = %raw, "Ignoring non-numeric search setting");
                None
            }
        }
    }

    fn boost_or_one(&self, key: &str) -> f64 {
        match self.get_f64(key) {
            Some(value) if value != 0.0 => value,
            _ => 1.0,
        }
    }

    pub fn query_type_boost(&self, query_type: SearchQueryType) -> f64 {
        self.boost_or_one(&format!("{BOOST_PARTS}__query_types__{query_type}"))
    }

    /// Boost for an analyzer; `keyword` fields share the `explicit` boost
    pub fn analyzer_boost(&self, analysis_type: AnalysisType) -> SearchResult<f64> {
        let boost_key = match analysis_type {
            AnalysisType::Tokenized => "tokenized",
            AnalysisType::Explicit | AnalysisType::Keyword => "explicit",
            AnalysisType::Proximity | AnalysisType::Filter => {
                return Err(SearchError::InvalidAnalysisType(analysis_type))
            }
        };
        if !self.is_analyzer_configured(analysis_type) {
            return Err(SearchError::InvalidAnalysisType(analysis_type));
        }
        Ok(self.boost_or_one(&format!("{BOOST_PARTS}__analyzers__{boost_key}")))
    }

    /// Boost declared for a field, keyed by the model that declares it
    pub fn field_boost(&self, definition_model: &str, field_path: &str) -> f64 {
        self.boost_or_one(&field_boost_key(definition_model, field_path))
    }

    pub fn is_analyzer_configured(&self, analysis_type: AnalysisType) -> bool {
        let prefix = format!("analyzers__{analysis_type}__");
        let layers = self.layers.read();
        layers
            .ordered()
            .iter()
            .any(|(_, layer)| layer.keys().any(|k| k.starts_with(&prefix)))
    }

    /// Query types run against fields indexed with the analyzer
    pub fn analyzer_query_types(&self, analysis_type: AnalysisType) -> Vec<SearchQueryType> {
        let Some(raw) = self.get(&format!("analyzers__{analysis_type}__query_types")) else {
            return Vec::new();
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| match SearchQueryType::from_str(&s.to_lowercase()) {
                Ok(query_type) => Some(query_type),
                Err(_) => {
                    warn!(analyzer = %analysis_type, query_type = %s, "Unknown query type in settings");
                    None
                }
            })
            .collect()
    }

    pub fn index_fieldname_suffix(&self, analysis_type: AnalysisType) -> String {
        self.get(&format!("analyzers__{analysis_type}__index_fieldname_suffix"))
            .unwrap_or_default()
    }

    pub fn es_analyzer(&self, analysis_type: AnalysisType) -> Option<String> {
        self.get(&format!("analyzers__{analysis_type}__es_analyzer"))
    }

    /// Every effective setting, sorted by key
    pub fn list(&self) -> Vec<SettingEntry> {
        let layers = self.layers.read();
        let mut merged: BTreeMap<&str, (&str, SettingSource)> = BTreeMap::new();
        for (source, layer) in layers.ordered().into_iter().rev() {
            for (key, value) in layer {
                merged.insert(key.as_str(), (value.as_str(), source));
            }
        }
        merged
            .into_iter()
            .map(|(key, (value, source))| SettingEntry {
                key: key.to_string(),
                value: value.to_string(),
                source,
            })
            .collect()
    }

    /// Boost settings only, as offered on the explore page
    pub fn boost_settings(&self) -> Vec<SettingEntry> {
        self.list()
            .into_iter()
            .filter(|entry| entry.key.contains(BOOST_PARTS))
            .collect()
    }

    /// Store a runtime override
    pub async fn set(&self, key: &str, value: &str) -> SearchResult<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(SearchError::InvalidConfiguration(
                "Setting key cannot be empty".to_string(),
            ));
        }
        self.store.put_setting(key, value).await?;
        self.layers
            .write()
            .runtime
            .insert(key.to_string(), value.to_string());
        self.bump();
        info!(key = %key, value = %value, "Search setting updated");
        Ok(())
    }

    /// Drop a runtime override so lower layers apply again
    pub async fn reset(&self, key: &str) -> SearchResult<()> {
        self.store.delete_setting(key).await?;
        self.layers.write().runtime.remove(key);
        self.bump();
        info!(key = %key, "Search setting reset");
        Ok(())
    }
}

/// Settings key holding the boost for a declared field
pub fn field_boost_key(definition_model: &str, field_path: &str) -> String {
    format!("{BOOST_PARTS}__fields__{definition_model}.{field_path}")
}

/// Read `SEARCH_EXTENDED__<key>` variables, from the process or from `source`
pub fn env_settings(
    source: Option<HashMap<String, String>>,
) -> SearchResult<BTreeMap<String, String>> {
    let environment = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .source(source.map(|vars| vars.into_iter().collect()));

    let values: HashMap<String, String> = config::Config::builder()
        .add_source(environment)
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| SearchError::InvalidConfiguration(e.to_string()))?;

    Ok(values
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect())
}
