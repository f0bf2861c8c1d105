//! Compiles field declarations and boost settings into query templates

use crate::search::error::SearchResult;
use crate::search::fields::{EffectiveField, FieldSpec, IndexedField, ModelRegistry};
use crate::search::query::{ContentTypeFilter, QueryLeafInfo, QueryNode};
use crate::search::settings::SearchSettings;
use crate::search::types::{AnalysisType, SearchQueryType};
use crate::state::AppCache;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::debug;

const TEMPLATE_CACHE_CAPACITY: u64 = 256;

type TemplateCache = AppCache<(String, u64), Option<QueryNode>>;

/// Builds (and caches) the weighted query template of each model
pub struct QueryBuilder {
    registry: Arc<ModelRegistry>,
    settings: Arc<SearchSettings>,
    cache: Option<TemplateCache>,
}

impl QueryBuilder {
    pub fn new(
        registry: Arc<ModelRegistry>,
        settings: Arc<SearchSettings>,
        enable_cache: bool,
    ) -> Self {
        Self {
            registry,
            settings,
            cache: enable_cache.then(|| AppCache::unbounded_ttl(TEMPLATE_CACHE_CAPACITY)),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Name of the index field holding `field_path` analyzed with `analysis_type`
    pub fn indexed_field_name(&self, field_path: &str, analysis_type: AnalysisType) -> String {
        format!(
            "{}{}",
            field_path,
            self.settings.index_fieldname_suffix(analysis_type)
        )
    }

    /// Analyzer suffixes, used to recognise the analyzer of an index field
    pub fn suffix_map(&self) -> Vec<(AnalysisType, String)> {
        AnalysisType::iter()
            .map(|analyzer| (analyzer, self.settings.index_fieldname_suffix(analyzer)))
            .collect()
    }

    fn leaf(
        &self,
        definition_model: &str,
        field_path: &str,
        query_type: SearchQueryType,
        analysis_type: AnalysisType,
    ) -> SearchResult<QueryNode> {
        let boost = self.settings.query_type_boost(query_type)
            * self.settings.analyzer_boost(analysis_type)?
            * self.settings.field_boost(definition_model, field_path);

        Ok(QueryNode::variable(query_type)
            .boosted(boost)
            .only_fields(vec![self.indexed_field_name(field_path, analysis_type)]))
    }

    fn query_for_field(
        &self,
        definition_model: &str,
        field_path: &str,
        field: &IndexedField,
    ) -> SearchResult<Option<QueryNode>> {
        let mut leaves = Vec::new();
        for analysis_type in field.search_analyzers() {
            for query_type in self.settings.analyzer_query_types(analysis_type) {
                leaves.push(self.leaf(definition_model, field_path, query_type, analysis_type)?);
            }
        }

        let subquery = QueryNode::or(leaves);
        if field.fuzzy {
            let fuzzy = self.leaf(
                definition_model,
                field_path,
                SearchQueryType::Fuzzy,
                AnalysisType::Tokenized,
            )?;
            return Ok(QueryNode::combine(Some(fuzzy), subquery));
        }
        Ok(subquery)
    }

    fn query_for_spec(&self, field: &EffectiveField<'_>) -> SearchResult<Option<QueryNode>> {
        match field.spec {
            FieldSpec::Field(indexed) => {
                self.query_for_field(field.definition_model, &indexed.name, indexed)
            }
            FieldSpec::Related(related) => {
                let mut children = Vec::new();
                for (path, indexed) in field.spec.leaves() {
                    if let Some(query) =
                        self.query_for_field(field.definition_model, &path, indexed)?
                    {
                        children.push(query);
                    }
                }
                Ok(QueryNode::or(children).map(|q| q.nested(related.path.clone())))
            }
        }
    }

    /// OR of every field the model searches, ignoring subtype branches,
    /// wrapped in the model's score functions
    pub fn build_query_for_model(&self, label: &str) -> SearchResult<Option<QueryNode>> {
        let mut queries = Vec::new();
        for field in self.registry.effective_fields(label)? {
            if let Some(query) = self.query_for_spec(&field)? {
                queries.push(query);
            }
        }
        let functions = self.registry.effective_score_functions(label)?;
        Ok(QueryNode::or(queries).map(|query| {
            functions
                .into_iter()
                .rev()
                .fold(query, |query, function| query.scored_by(function.clone()))
        }))
    }

    /// Full template for a model.
    ///
    /// Subtypes with fields of their own get a branch restricted to their
    /// content type; the model's own branch then excludes those subtypes.
    pub async fn build_search_query(&self, label: &str) -> SearchResult<Option<QueryNode>> {
        let key = (label.to_string(), self.settings.version());
        if let Some(cache) = &self.cache {
            if let Some(template) = cache.get(&key).await {
                return Ok(template);
            }
        }

        let extended = self.registry.extended_models_with_unique_fields(label);
        let template = if extended.is_empty() {
            self.build_query_for_model(label)?
        } else {
            let labels: Vec<String> = extended.iter().map(|m| m.label.clone()).collect();
            let mut branches = Vec::new();
            if let Some(root) = self.build_query_for_model(label)? {
                branches.push(root.filtered(vec![ContentTypeFilter::Excludes(labels)]));
            }
            for model in &extended {
                if let Some(branch) = self.build_query_for_model(&model.label)? {
                    branches.push(
                        branch.filtered(vec![ContentTypeFilter::Contains(model.label.clone())]),
                    );
                }
            }
            QueryNode::or(branches)
        };

        debug!(model = %label, version = key.1, "Built search query template");
        if let Some(cache) = &self.cache {
            cache.insert(key, template.clone()).await;
        }
        Ok(template)
    }

    /// Template bound to the user's text; `None` when nothing can match
    pub async fn get_search_query(
        &self,
        label: &str,
        query_text: &str,
    ) -> SearchResult<Option<QueryNode>> {
        Ok(self
            .build_search_query(label)
            .await?
            .and_then(|template| template.swap_variables(query_text)))
    }

    /// Prefix query over the autocomplete fields of the model and its
    /// subtypes; `None` when there is no text or no such field
    pub fn build_autocomplete_query(
        &self,
        label: &str,
        query_text: &str,
    ) -> SearchResult<Option<QueryNode>> {
        let text = query_text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let mut labels = vec![label];
        labels.extend(
            self.registry
                .descendants(label)
                .into_iter()
                .map(|model| model.label.as_str()),
        );
        let mut fields: Vec<String> = Vec::new();
        for model in labels {
            for effective in self.registry.effective_fields(model)? {
                for (path, indexed) in effective.spec.leaves() {
                    if indexed.autocomplete && !fields.contains(&path) {
                        fields.push(path);
                    }
                }
            }
        }
        if fields.is_empty() {
            return Ok(None);
        }

        let query = QueryNode::Autocomplete {
            text: text.to_string(),
        }
        .only_fields(fields);
        Ok(Some(
            self.registry
                .effective_score_functions(label)?
                .into_iter()
                .rev()
                .fold(query, |query, function| query.scored_by(function.clone())),
        ))
    }

    /// Weighted leaves of the model's own fields that apply to `query_text`
    pub fn query_info_for_model(
        &self,
        label: &str,
        query_text: &str,
    ) -> SearchResult<Vec<QueryLeafInfo>> {
        Ok(self
            .build_query_for_model(label)?
            .map(|template| template.query_info(query_text, &self.suffix_map()))
            .unwrap_or_default())
    }

    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }
}
