//! Category search over the index, with pinned and excluded results

use crate::models::{ContentRef, LookupKind, Page, PageKind, Team};
use crate::search::backend::{content_type_term, scored_top_docs, TantivyBackend};
use crate::search::config::SearchConfig;
use crate::search::curation::CurationService;
use crate::search::document::{
    PersonDocument, SearchDocument, TeamDocument, DJANGO_CT_FIELD, ID_FIELD, OBJECT_ID_FIELD,
    PUBLISHED_AT_FIELD, TITLE_FIELD,
};
use crate::search::error::{SearchError, SearchResult};
use crate::search::fields::{
    FieldSpec, IndexedField, ModelRegistry, CONTENT_PAGE_MODEL, PERSON_MODEL, TEAM_MODEL,
};
use crate::search::index::{IndexManager, IndexStats};
use crate::search::query::{median_boost, QueryLeafInfo, QueryNode, ScoreFunction};
use crate::search::query_builder::QueryBuilder;
use crate::search::sanitize::{normalize_query, sanitize_search_query};
use crate::search::settings::{SearchSettings, SettingEntry};
use crate::search::types::{AnalysisType, SearchCategory};
use crate::state::{DirectoryStore, PageStore, Stores};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tantivy::collector::Count;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{TantivyDocument, Term};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A single search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,

    /// Content type of the object
    pub content_type: String,

    pub object_id: Uuid,

    pub title: String,

    pub published_at: Option<DateTime<Utc>>,

    /// Relevance score (0 for pinned results)
    pub score: f32,

    /// Placed ahead of the ranked results by an editor
    pub pinned: bool,
}

/// Search response with results and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub category: SearchCategory,

    /// Sanitised query that was executed
    pub query: String,

    pub page: usize,

    pub page_size: usize,

    /// Pinned results, shown on the first page only
    pub pinned: Vec<SearchHit>,

    /// Ranked results of the requested page
    pub hits: Vec<SearchHit>,

    /// Total ranked hits (before pagination)
    pub total_hits: usize,

    /// Score at or below which the top result is considered a poor match
    pub bad_results_threshold: f64,

    /// Nothing pinned and even the best ranked result is a poor match
    pub has_only_bad_results: bool,

    /// Search execution time in milliseconds
    pub search_time_ms: u64,
}

/// Number of results a query would return in a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: SearchCategory,
    pub count: usize,
}

/// How one model's query is weighted for a query text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreSubQuery {
    pub name: String,
    pub model: String,
    pub threshold: f64,
    pub leaves: Vec<QueryLeafInfo>,
}

/// Everything the explore page shows for a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreResponse {
    pub query: String,
    pub boost_settings: Vec<SettingEntry>,
    pub sub_queries: Vec<ExploreSubQuery>,
    pub counts: Vec<CategoryCount>,
}

/// Suggestions shown per category while the user types
pub const AUTOCOMPLETE_LIMIT: usize = 3;

/// Best prefix matches per category for a partly typed query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutocompleteResponse {
    pub query: String,
    pub tools: Vec<SearchHit>,
    pub pages: Vec<SearchHit>,
    pub people: Vec<SearchHit>,
    pub teams: Vec<SearchHit>,
}

/// A category's compiled query and the score functions its hits are ranked with
struct RankedQuery {
    query: Box<dyn Query>,
    functions: Vec<ScoreFunction>,
}

/// Main search service
pub struct SearchService {
    index_manager: Arc<IndexManager>,
    registry: Arc<ModelRegistry>,
    settings: Arc<SearchSettings>,
    query_builder: QueryBuilder,
    curation: CurationService,
    directory: Arc<dyn DirectoryStore>,
    pages: Arc<dyn PageStore>,
    config: SearchConfig,
}

impl SearchService {
    /// Create a search service over the stores, reading setting overrides from the environment
    pub async fn new(config: SearchConfig, stores: &Stores) -> SearchResult<Self> {
        let registry = Arc::new(ModelRegistry::with_builtin_models());
        let settings = SearchSettings::load(
            &config.settings,
            registry.declared_field_boosts(),
            stores.settings.clone(),
        )
        .await?;
        Self::assemble(config, stores, registry, settings).await
    }

    /// Create a search service with an explicit environment layer
    pub async fn with_env(
        config: SearchConfig,
        stores: &Stores,
        env: BTreeMap<String, String>,
    ) -> SearchResult<Self> {
        let registry = Arc::new(ModelRegistry::with_builtin_models());
        let settings = SearchSettings::with_env(
            &config.settings,
            registry.declared_field_boosts(),
            env,
            stores.settings.clone(),
        )
        .await?;
        Self::assemble(config, stores, registry, settings).await
    }

    async fn assemble(
        config: SearchConfig,
        stores: &Stores,
        registry: Arc<ModelRegistry>,
        settings: SearchSettings,
    ) -> SearchResult<Self> {
        let index_manager = Arc::new(IndexManager::new(&config, &registry).await?);
        let settings = Arc::new(settings);
        let query_builder =
            QueryBuilder::new(registry.clone(), settings.clone(), config.enable_query_cache);

        Ok(Self {
            index_manager,
            registry,
            settings,
            query_builder,
            curation: CurationService::new(stores.curation.clone()),
            directory: stores.directory.clone(),
            pages: stores.pages.clone(),
            config,
        })
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn query_builder(&self) -> &QueryBuilder {
        &self.query_builder
    }

    pub fn curation(&self) -> &CurationService {
        &self.curation
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Index a team with the job titles of its active members
    pub async fn index_team(&self, team_id: &Uuid) -> SearchResult<()> {
        let Some(team) = self.directory.get_team(team_id).await? else {
            return self.remove(&ContentRef::new(TEAM_MODEL, *team_id)).await;
        };

        let document = self.team_document(team).await?;
        self.index_manager
            .index_document(&document, &self.registry)
            .await
    }

    async fn team_document(&self, team: Team) -> SearchResult<TeamDocument> {
        let mut roles_in_team = Vec::new();
        for member in self.directory.members_of_teams(&[team.id]).await? {
            if member.is_active
                && !member.job_title.is_empty()
                && !roles_in_team.contains(&member.job_title)
            {
                roles_in_team.push(member.job_title);
            }
        }
        Ok(TeamDocument {
            team,
            roles_in_team,
        })
    }

    /// Index a person; inactive or missing people are removed from the index
    pub async fn index_person(&self, person_id: &Uuid) -> SearchResult<()> {
        match self.person_document(person_id).await? {
            Some(document) => {
                self.index_manager
                    .index_document(&document, &self.registry)
                    .await
            }
            None => self.remove(&ContentRef::new(PERSON_MODEL, *person_id)).await,
        }
    }

    async fn person_document(&self, person_id: &Uuid) -> SearchResult<Option<PersonDocument>> {
        let Some(person) = self.directory.get_person(person_id).await? else {
            return Ok(None);
        };
        if !person.is_active {
            return Ok(None);
        }

        let mut job_titles = Vec::new();
        for member in self.directory.members_of_person(person_id).await? {
            if member.is_active
                && !member.job_title.is_empty()
                && !job_titles.contains(&member.job_title)
            {
                job_titles.push(member.job_title);
            }
        }
        Ok(Some(PersonDocument { person, job_titles }))
    }

    /// Index a page, or remove it when it no longer exists
    pub async fn index_page(&self, page_id: &Uuid) -> SearchResult<()> {
        match self.pages.get_page(page_id).await? {
            Some(page) => self.index_manager.index_document(&page, &self.registry).await,
            None => {
                for kind in PageKind::iter() {
                    self.remove(&ContentRef::new(kind.content_type(), *page_id))
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Remove an object from the index
    pub async fn remove(&self, target: &ContentRef) -> SearchResult<()> {
        self.index_manager
            .delete_document(&target.document_id())
            .await
    }

    /// Rebuild the whole index from the stores
    pub async fn reindex(&self) -> SearchResult<usize> {
        let mut documents: Vec<Box<dyn SearchDocument>> = Vec::new();

        for team in self.directory.list_teams().await? {
            documents.push(Box::new(self.team_document(team).await?));
        }

        for person in self.directory.list_people().await? {
            if let Some(document) = self.person_document(&person.id).await? {
                documents.push(Box::new(document));
            }
        }

        for page in self.pages.list_pages().await? {
            documents.push(Box::new(page));
        }

        self.index_manager.clear_index().await?;
        let indexed = self
            .index_manager
            .index_documents(&documents, &self.registry)
            .await?;
        info!(documents = indexed, "Search index rebuilt");
        Ok(indexed)
    }

    /// Search one category
    pub async fn search(
        &self,
        category: SearchCategory,
        raw_query: Option<&str>,
        page: usize,
    ) -> SearchResult<SearchResponse> {
        let start_time = std::time::Instant::now();
        let query = sanitize_search_query(raw_query);
        let page = page.max(1);
        let page_size = self.config.page_size.max(1);

        let mut response = SearchResponse {
            category,
            query: query.clone(),
            page,
            page_size,
            pinned: Vec::new(),
            hits: Vec::new(),
            total_hits: 0,
            bad_results_threshold: 0.0,
            has_only_bad_results: false,
            search_time_ms: 0,
        };
        if normalize_query(&query).is_empty() {
            return Ok(response);
        }

        let pinned_refs = if category.is_page_category() {
            self.curation.pinned(&query).await?
        } else {
            Vec::new()
        };
        let mut hidden = pinned_refs.clone();
        hidden.extend(self.curation.excluded(&query).await?);

        if page == 1 {
            response.pinned = self.pinned_hits(category, &pinned_refs).await?;
        }

        let Some(ranked) = self.ranked_query(category, &query, &hidden).await? else {
            response.search_time_ms = start_time.elapsed().as_millis() as u64;
            return Ok(response);
        };

        let searcher = self.index_manager.reader().searcher();
        let offset = (page - 1) * page_size;
        let limit = page_size.min(self.config.max_results.saturating_sub(offset));

        if limit > 0 {
            let top_docs = searcher
                .search(
                    &*ranked.query,
                    &scored_top_docs(ranked.functions.clone(), limit, offset),
                )
                .map_err(|e| SearchError::SearchFailed(format!("Search execution failed: {}", e)))?;

            for (score, doc_address) in top_docs {
                let doc: TantivyDocument = searcher.doc(doc_address).map_err(|e| {
                    SearchError::SearchFailed(format!("Failed to retrieve document: {}", e))
                })?;
                response.hits.push(self.doc_to_hit(&doc, score)?);
            }
        }

        response.total_hits = searcher
            .search(&*ranked.query, &Count)
            .map_err(|e| SearchError::SearchFailed(format!("Count failed: {}", e)))?;

        let top_score = if page == 1 {
            response.hits.first().map(|hit| hit.score)
        } else {
            searcher
                .search(&*ranked.query, &scored_top_docs(ranked.functions.clone(), 1, 0))
                .map_err(|e| SearchError::SearchFailed(format!("Search execution failed: {}", e)))?
                .first()
                .map(|(score, _)| *score)
        };

        response.bad_results_threshold = self.bad_results_threshold(category, &query)?;
        response.has_only_bad_results = pinned_refs.is_empty()
            && top_score
                .map(|score| f64::from(score) <= response.bad_results_threshold)
                .unwrap_or(false);
        response.search_time_ms = start_time.elapsed().as_millis() as u64;

        debug!(
            category = %category,
            query = %query,
            total_hits = response.total_hits,
            pinned = response.pinned.len(),
            bad = response.has_only_bad_results,
            "Search completed"
        );
        Ok(response)
    }

    /// Search a category named by the user; unknown names search all pages
    pub async fn search_named(
        &self,
        category: &str,
        raw_query: Option<&str>,
        page: usize,
    ) -> SearchResult<SearchResponse> {
        let category = SearchCategory::from_str(category).unwrap_or_else(|_| {
            warn!(category = %category, "Unknown search category, searching all pages");
            SearchCategory::AllPages
        });
        self.search(category, raw_query, page).await
    }

    /// Search-as-you-type suggestions for tools, pages, people and teams
    pub async fn autocomplete(&self, raw_query: Option<&str>) -> SearchResult<AutocompleteResponse> {
        let query = sanitize_search_query(raw_query);
        let mut response = AutocompleteResponse {
            query: query.clone(),
            ..Default::default()
        };
        if normalize_query(&query).is_empty() {
            return Ok(response);
        }

        let excluded = self.curation.excluded(&query).await?;
        response.tools = self
            .autocomplete_hits(SearchCategory::Tools, &query, &excluded)
            .await?;
        response.pages = self
            .autocomplete_hits(SearchCategory::AllPages, &query, &excluded)
            .await?;
        response.people = self
            .autocomplete_hits(SearchCategory::People, &query, &excluded)
            .await?;
        response.teams = self
            .autocomplete_hits(SearchCategory::Teams, &query, &excluded)
            .await?;

        debug!(
            query = %query,
            tools = response.tools.len(),
            pages = response.pages.len(),
            people = response.people.len(),
            teams = response.teams.len(),
            "Autocomplete completed"
        );
        Ok(response)
    }

    async fn autocomplete_hits(
        &self,
        category: SearchCategory,
        query: &str,
        hidden: &[ContentRef],
    ) -> SearchResult<Vec<SearchHit>> {
        let Some(node) = self
            .query_builder
            .build_autocomplete_query(category.model_label(), query)?
        else {
            return Ok(Vec::new());
        };
        let Some(ranked) = self.restricted(category, &node, hidden)? else {
            return Ok(Vec::new());
        };

        let searcher = self.index_manager.reader().searcher();
        let top_docs = searcher
            .search(
                &*ranked.query,
                &scored_top_docs(ranked.functions, AUTOCOMPLETE_LIMIT, 0),
            )
            .map_err(|e| SearchError::SearchFailed(format!("Autocomplete failed: {}", e)))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address).map_err(|e| {
                SearchError::SearchFailed(format!("Failed to retrieve document: {}", e))
            })?;
            hits.push(self.doc_to_hit(&doc, score)?);
        }
        Ok(hits)
    }

    /// Result counts for every category, pinned results included
    pub async fn category_counts(&self, raw_query: Option<&str>) -> SearchResult<Vec<CategoryCount>> {
        let query = sanitize_search_query(raw_query);
        if normalize_query(&query).is_empty() {
            return Ok(SearchCategory::iter()
                .map(|category| CategoryCount { category, count: 0 })
                .collect());
        }

        let pinned = self.curation.pinned(&query).await?;
        let excluded = self.curation.excluded(&query).await?;
        let searcher = self.index_manager.reader().searcher();

        let mut counts = Vec::new();
        for category in SearchCategory::iter() {
            let pinned_refs: &[ContentRef] = if category.is_page_category() {
                &pinned
            } else {
                &[]
            };
            let mut hidden = pinned_refs.to_vec();
            hidden.extend(excluded.iter().cloned());

            let ranked = match self.ranked_query(category, &query, &hidden).await? {
                Some(ranked) => searcher
                    .search(&*ranked.query, &Count)
                    .map_err(|e| SearchError::SearchFailed(format!("Count failed: {}", e)))?,
                None => 0,
            };
            let pinned_count = self.pinned_hits(category, pinned_refs).await?.len();
            counts.push(CategoryCount {
                category,
                count: ranked + pinned_count,
            });
        }
        Ok(counts)
    }

    /// Pinned pages that belong to the category, newest first
    async fn pinned_hits(
        &self,
        category: SearchCategory,
        pinned: &[ContentRef],
    ) -> SearchResult<Vec<SearchHit>> {
        let mut pages: Vec<Page> = Vec::new();
        for target in pinned {
            let Some(page) = self.pages.get_page(&target.object_id).await? else {
                continue;
            };
            if page.kind.content_type() != target.content_type {
                continue;
            }
            let content_types = self.registry.content_types(page.kind.content_type())?;
            if content_types.iter().any(|label| label == category.restrict_to()) {
                pages.push(page);
            }
        }
        pages.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        Ok(pages
            .into_iter()
            .map(|page| SearchHit {
                document_id: page.document_id(),
                content_type: page.kind.content_type().to_string(),
                object_id: page.id,
                title: page.title,
                published_at: Some(page.published_at),
                score: 0.0,
                pinned: true,
            })
            .collect())
    }

    /// The category's compiled query, restricted to its content type and
    /// with `hidden` objects removed
    async fn ranked_query(
        &self,
        category: SearchCategory,
        query: &str,
        hidden: &[ContentRef],
    ) -> SearchResult<Option<RankedQuery>> {
        let Some(node) = self
            .query_builder
            .get_search_query(category.model_label(), query)
            .await?
        else {
            return Ok(None);
        };

        self.restricted(category, &node, hidden)
    }

    /// Compile `node` for the category's content type, with `hidden` objects removed
    fn restricted(
        &self,
        category: SearchCategory,
        node: &QueryNode,
        hidden: &[ContentRef],
    ) -> SearchResult<Option<RankedQuery>> {
        let index = self.index_manager.index();
        let backend = TantivyBackend::new(index, self.query_builder.suffix_map());
        let Some(compiled) = backend.compile(node)? else {
            return Ok(None);
        };

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![
            (Occur::Must, compiled),
            (Occur::Must, content_type_term(index, category.restrict_to())?),
        ];

        let id_field = self.index_manager.schema().get_field(ID_FIELD)?;
        let mut seen = HashSet::new();
        for target in hidden {
            let document_id = target.document_id();
            if seen.insert(document_id.clone()) {
                clauses.push((
                    Occur::MustNot,
                    Box::new(TermQuery::new(
                        Term::from_field_text(id_field, &document_id),
                        IndexRecordOption::Basic,
                    )),
                ));
            }
        }

        Ok(Some(RankedQuery {
            query: Box::new(BooleanQuery::new(clauses)),
            functions: node.score_functions().into_iter().cloned().collect(),
        }))
    }

    /// Median leaf boost of the category's model for the query, scaled by the
    /// category's configured multiplier
    pub fn bad_results_threshold(&self, category: SearchCategory, query: &str) -> SearchResult<f64> {
        let leaves = self
            .query_builder
            .query_info_for_model(category.model_label(), query)?;
        Ok(median_boost(&leaves) * self.config.bad_score_multiplier(&category.to_string()))
    }

    /// Query weighting of pages, people and teams for a query
    pub async fn explore(&self, raw_query: Option<&str>) -> SearchResult<ExploreResponse> {
        let query = sanitize_search_query(raw_query);

        let mut sub_queries = Vec::new();
        for (name, category) in [
            ("pages", SearchCategory::AllPages),
            ("people", SearchCategory::People),
            ("teams", SearchCategory::Teams),
        ] {
            let model = category.model_label();
            sub_queries.push(ExploreSubQuery {
                name: name.to_string(),
                model: model.to_string(),
                threshold: self.bad_results_threshold(category, &query)?,
                leaves: self.query_builder.query_info_for_model(model, &query)?,
            });
        }

        Ok(ExploreResponse {
            counts: self.category_counts(Some(&query)).await?,
            query,
            boost_settings: self.settings.boost_settings(),
            sub_queries,
        })
    }

    /// Override a setting at runtime
    pub async fn set_setting(&self, key: &str, value: &str) -> SearchResult<()> {
        self.settings.set(key, value).await?;
        self.query_builder.invalidate_cache();
        Ok(())
    }

    /// Remove a runtime override
    pub async fn reset_setting(&self, key: &str) -> SearchResult<()> {
        self.settings.reset(key).await?;
        self.query_builder.invalidate_cache();
        Ok(())
    }

    /// Render the query a category would run, in search engine DSL
    pub async fn query_dsl(
        &self,
        category: SearchCategory,
        raw_query: Option<&str>,
    ) -> SearchResult<Option<JsonValue>> {
        let query = sanitize_search_query(raw_query);
        self.query_builder
            .get_search_query(category.model_label(), &query)
            .await?
            .map(|node| node.to_dsl())
            .transpose()
    }

    /// Field mappings per model, named with the configured analyzer suffixes
    pub fn index_mapping(&self) -> SearchResult<JsonValue> {
        let mut models = Map::new();
        for model in self.registry.models() {
            let mut properties = Map::new();
            for effective in self.registry.effective_fields(&model.label)? {
                match effective.spec {
                    FieldSpec::Field(field) => self.insert_mappings(&mut properties, field),
                    FieldSpec::Related(related) => {
                        let mut nested = Map::new();
                        for field in &related.fields {
                            self.insert_mappings(&mut nested, field);
                        }
                        properties.insert(
                            related.path.clone(),
                            json!({"type": "nested", "properties": nested}),
                        );
                    }
                }
            }
            for function in self.registry.effective_score_functions(&model.label)? {
                properties.insert(function.field.clone(), json!({"type": "float"}));
            }
            models.insert(model.label.clone(), json!({"properties": properties}));
        }
        Ok(JsonValue::Object(models))
    }

    fn insert_mappings(&self, properties: &mut Map<String, JsonValue>, field: &IndexedField) {
        let analyzers = field
            .search_analyzers()
            .into_iter()
            .chain(field.filter_analyzers());
        for analyzer in analyzers {
            properties.insert(
                self.query_builder.indexed_field_name(&field.name, analyzer),
                self.field_mapping(analyzer),
            );
        }
    }

    fn field_mapping(&self, analyzer: AnalysisType) -> JsonValue {
        match self.settings.es_analyzer(analyzer) {
            Some(es_analyzer) if analyzer.is_searchable() => {
                json!({"type": "text", "analyzer": es_analyzer})
            }
            _ => json!({"type": "keyword"}),
        }
    }

    /// Replace the phrases pinning a page
    pub async fn set_pinned_phrases(&self, target: &ContentRef, phrases: &str) -> SearchResult<Vec<String>> {
        self.ensure_page(target).await?;
        self.curation.manage_pinned(target, phrases).await
    }

    /// Replace the phrases excluding an object
    pub async fn set_excluded_phrases(
        &self,
        target: &ContentRef,
        phrases: &str,
    ) -> SearchResult<Vec<String>> {
        self.curation.manage_excluded(target, phrases).await
    }

    /// Phrases currently attached to an object
    pub async fn phrases_for(&self, kind: LookupKind, target: &ContentRef) -> SearchResult<Vec<String>> {
        self.curation.phrases_for(kind, target).await
    }

    async fn ensure_page(&self, target: &ContentRef) -> SearchResult<()> {
        let content_types = self.registry.content_types(&target.content_type)?;
        if !content_types.iter().any(|label| label == CONTENT_PAGE_MODEL) {
            return Err(SearchError::InvalidConfiguration(format!(
                "Only pages can be pinned, not '{}'",
                target.content_type
            )));
        }
        Ok(())
    }

    /// Get index statistics
    pub async fn get_stats(&self) -> SearchResult<IndexStats> {
        self.index_manager.get_stats().await
    }

    /// Convert a stored document to a search hit
    fn doc_to_hit(&self, doc: &TantivyDocument, score: f32) -> SearchResult<SearchHit> {
        let schema = self.index_manager.schema();

        let object_id = get_field_value(doc, schema, OBJECT_ID_FIELD)
            .and_then(|id| Uuid::parse_str(&id).ok())
            .ok_or_else(|| SearchError::SearchFailed("Missing object ID".to_string()))?;

        let published_at = schema
            .get_field(PUBLISHED_AT_FIELD)
            .ok()
            .and_then(|field| doc.get_first(field))
            .and_then(|v| v.as_i64())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        Ok(SearchHit {
            document_id: get_field_value(doc, schema, ID_FIELD).unwrap_or_default(),
            content_type: get_field_value(doc, schema, DJANGO_CT_FIELD).unwrap_or_default(),
            object_id,
            title: get_field_value(doc, schema, TITLE_FIELD).unwrap_or_default(),
            published_at,
            score,
            pinned: false,
        })
    }
}

/// Helper to get a field value from a document
fn get_field_value(
    doc: &TantivyDocument,
    schema: &tantivy::schema::Schema,
    field_name: &str,
) -> Option<String> {
    let field = schema.get_field(field_name).ok()?;
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Person, TeamMember};
    use crate::search::config::SearchConfigBuilder;
    use crate::search::fields::{NEWS_PAGE_MODEL, TOOL_MODEL};
    use crate::state::create_in_memory_stores;
    use chrono::Duration;

    async fn service_with(config: SearchConfig) -> (SearchService, Stores) {
        let stores = create_in_memory_stores();
        let service = SearchService::with_env(config, &stores, BTreeMap::new())
            .await
            .unwrap();
        (service, stores)
    }

    async fn service() -> (SearchService, Stores) {
        service_with(SearchConfig::default()).await
    }

    async fn add_page(service: &SearchService, stores: &Stores, page: Page) -> Page {
        stores.pages.save_page(&page).await.unwrap();
        service.index_page(&page.id).await.unwrap();
        page
    }

    #[tokio::test]
    async fn test_search_ranks_title_matches() {
        let (service, stores) = service().await;
        let leave = add_page(&service, &stores, Page::new(PageKind::Content, "Annual leave")).await;
        add_page(
            &service,
            &stores,
            Page::new(PageKind::Content, "Working hours").with_body("Leave is covered elsewhere"),
        )
        .await;

        let response = service
            .search(SearchCategory::AllPages, Some("annual leave"), 1)
            .await
            .unwrap();

        // "leave" alone matches the second page's body
        assert_eq!(response.total_hits, 2);
        assert_eq!(response.hits[0].object_id, leave.id);
        assert_eq!(response.hits[0].content_type, CONTENT_PAGE_MODEL);
        assert!(!response.has_only_bad_results);
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let (service, stores) = service().await;
        add_page(&service, &stores, Page::new(PageKind::Content, "Annual leave")).await;

        let response = service
            .search(SearchCategory::AllPages, Some("  <>!  "), 1)
            .await
            .unwrap();
        assert!(response.hits.is_empty());
        assert_eq!(response.total_hits, 0);
        assert!(!response.has_only_bad_results);
    }

    #[tokio::test]
    async fn test_category_restricts_content_type() {
        let (service, stores) = service().await;
        let tool = add_page(&service, &stores, Page::new(PageKind::Tool, "Expenses")).await;
        add_page(&service, &stores, Page::new(PageKind::News, "Expenses rules change")).await;

        let tools = service
            .search(SearchCategory::Tools, Some("expenses"), 1)
            .await
            .unwrap();
        assert_eq!(tools.total_hits, 1);
        assert_eq!(tools.hits[0].object_id, tool.id);
        assert_eq!(tools.hits[0].content_type, TOOL_MODEL);

        let all = service
            .search(SearchCategory::AllPages, Some("expenses"), 1)
            .await
            .unwrap();
        assert_eq!(all.total_hits, 2);
    }

    #[tokio::test]
    async fn test_pinned_pages_lead_and_leave_ranked_results() {
        let (service, stores) = service().await;
        let older = add_page(
            &service,
            &stores,
            Page::new(PageKind::News, "Leave policy update")
                .published_at(Utc::now() - Duration::days(7)),
        )
        .await;
        let newer = add_page(&service, &stores, Page::new(PageKind::Content, "Holiday booking")).await;
        add_page(&service, &stores, Page::new(PageKind::Content, "Leave calculator")).await;

        for page in [&older, &newer] {
            service
                .set_pinned_phrases(&ContentRef::new(page.kind.content_type(), page.id), "leave")
                .await
                .unwrap();
        }

        let response = service
            .search(SearchCategory::AllPages, Some("leave"), 1)
            .await
            .unwrap();
        let pinned: Vec<Uuid> = response.pinned.iter().map(|hit| hit.object_id).collect();
        assert_eq!(pinned, vec![newer.id, older.id]);
        assert!(response.hits.iter().all(|hit| hit.object_id != older.id));
        assert_eq!(response.total_hits, 1);
        assert!(!response.has_only_bad_results);

        // pins outside the category are dropped
        let news = service
            .search(SearchCategory::News, Some("leave"), 1)
            .await
            .unwrap();
        assert_eq!(news.pinned.len(), 1);
        assert_eq!(news.pinned[0].content_type, NEWS_PAGE_MODEL);

        let second_page = service
            .search(SearchCategory::AllPages, Some("leave"), 2)
            .await
            .unwrap();
        assert!(second_page.pinned.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_objects_are_hidden() {
        let (service, stores) = service().await;
        let page = add_page(&service, &stores, Page::new(PageKind::Content, "Old intranet")).await;
        service
            .set_excluded_phrases(&ContentRef::new(CONTENT_PAGE_MODEL, page.id), "intranet")
            .await
            .unwrap();

        let response = service
            .search(SearchCategory::AllPages, Some("intranet"), 1)
            .await
            .unwrap();
        assert_eq!(response.total_hits, 0);
    }

    #[tokio::test]
    async fn test_only_pages_can_be_pinned() {
        let (service, _) = service().await;
        let result = service
            .set_pinned_phrases(&ContentRef::new(PERSON_MODEL, Uuid::new_v4()), "ada")
            .await;
        assert!(matches!(result, Err(SearchError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_weak_matches_are_flagged_as_bad() {
        let config = SearchConfigBuilder::new()
            .bad_score_multiplier("all_pages", 1000.0)
            .build();
        let (service, stores) = service_with(config).await;
        add_page(
            &service,
            &stores,
            Page::new(PageKind::Content, "Working hours").with_body("flexible working for everyone"),
        )
        .await;

        let response = service
            .search(SearchCategory::AllPages, Some("flexible"), 1)
            .await
            .unwrap();
        assert_eq!(response.total_hits, 1);
        assert!(response.has_only_bad_results);
        assert!(response.bad_results_threshold > 0.0);
    }

    #[tokio::test]
    async fn test_inactive_people_are_not_indexed() {
        let (service, stores) = service().await;
        let mut person = Person::new("Ada", "Lovelace", "ada@example.gov.uk");
        stores.directory.save_person(&person).await.unwrap();
        service.index_person(&person.id).await.unwrap();

        let found = service
            .search(SearchCategory::People, Some("lovelace"), 1)
            .await
            .unwrap();
        assert_eq!(found.total_hits, 1);
        assert_eq!(found.hits[0].title, "Ada Lovelace");

        person.is_active = false;
        stores.directory.save_person(&person).await.unwrap();
        service.index_person(&person.id).await.unwrap();

        let gone = service
            .search(SearchCategory::People, Some("lovelace"), 1)
            .await
            .unwrap();
        assert_eq!(gone.total_hits, 0);
    }

    #[tokio::test]
    async fn test_reindex_and_category_counts() {
        let (service, stores) = service().await;
        let team = Team::new("Data Science").with_slug("data-science");
        let person = Person::new("Grace", "Hopper", "grace@example.gov.uk");
        stores.directory.save_team(&team).await.unwrap();
        stores.directory.save_person(&person).await.unwrap();
        stores
            .directory
            .save_member(&TeamMember::new(person.id, team.id, "Data scientist"))
            .await
            .unwrap();
        stores
            .pages
            .save_page(&Page::new(PageKind::Guidance, "Data protection"))
            .await
            .unwrap();

        assert_eq!(service.reindex().await.unwrap(), 3);

        let counts: BTreeMap<String, usize> = service
            .category_counts(Some("data"))
            .await
            .unwrap()
            .into_iter()
            .map(|count| (count.category.to_string(), count.count))
            .collect();
        assert_eq!(counts["teams"], 1);
        assert_eq!(counts["people"], 1);
        assert_eq!(counts["guidance"], 1);
        assert_eq!(counts["all_pages"], 1);
        assert_eq!(counts["tools"], 0);
    }

    #[tokio::test]
    async fn test_settings_changes_reach_the_query() {
        let (service, _) = service().await;
        let before = service
            .query_dsl(SearchCategory::Teams, Some("data"))
            .await
            .unwrap()
            .unwrap();

        service
            .set_setting("boost_parts__query_types__phrase", "20.0")
            .await
            .unwrap();
        let after = service
            .query_dsl(SearchCategory::Teams, Some("data"))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(before, after);

        service
            .reset_setting("boost_parts__query_types__phrase")
            .await
            .unwrap();
        let reset = service
            .query_dsl(SearchCategory::Teams, Some("data"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before, reset);
    }

    #[tokio::test]
    async fn test_index_mapping_uses_suffixes() {
        let (service, _) = service().await;
        let mapping = service.index_mapping().unwrap();

        let team = &mapping[TEAM_MODEL]["properties"];
        assert_eq!(team["name"]["analyzer"], "snowball");
        assert_eq!(team["name_explicit"]["analyzer"], "simple");
        assert_eq!(team["abbreviation_keyword"]["analyzer"], "no_spaces");

        let person = &mapping[PERSON_MODEL]["properties"];
        assert_eq!(person["roles"]["type"], "nested");
        assert_eq!(person["roles"]["properties"]["job_title_explicit"]["type"], "text");
        assert_eq!(person["profile_completion"]["type"], "float");
        assert!(team.get("profile_completion").is_none());
    }

    #[tokio::test]
    async fn test_explore_lists_sub_queries() {
        let (service, _) = service().await;
        let explore = service.explore(Some("leave")).await.unwrap();

        let names: Vec<&str> = explore.sub_queries.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["pages", "people", "teams"]);
        assert!(explore.sub_queries.iter().all(|q| !q.leaves.is_empty()));
        assert!(explore
            .boost_settings
            .iter()
            .any(|entry| entry.key == "boost_parts__query_types__phrase"));
    }

    #[tokio::test]
    async fn test_autocomplete_caps_each_category() {
        let (service, stores) = service().await;
        let mut tools = Vec::new();
        for title in ["Travel booking", "Travel cards", "Travel expenses", "Travel insurance"] {
            tools.push(add_page(&service, &stores, Page::new(PageKind::Tool, title)).await);
        }
        add_page(&service, &stores, Page::new(PageKind::Content, "Travel policy")).await;

        let response = service.autocomplete(Some("trav")).await.unwrap();
        assert_eq!(response.tools.len(), AUTOCOMPLETE_LIMIT);
        assert!(response.tools.iter().all(|hit| hit.content_type == TOOL_MODEL));
        assert!(response.people.is_empty());

        // content pages declare no autocomplete fields of their own
        assert!(response
            .pages
            .iter()
            .all(|hit| hit.content_type == TOOL_MODEL));

        let hidden = ContentRef::new(TOOL_MODEL, tools[0].id);
        service.set_excluded_phrases(&hidden, "trav").await.unwrap();
        let response = service.autocomplete(Some("trav")).await.unwrap();
        assert_eq!(response.tools.len(), AUTOCOMPLETE_LIMIT);
        assert!(response.tools.iter().all(|hit| hit.object_id != tools[0].id));

        assert!(service.autocomplete(Some("  ")).await.unwrap().tools.is_empty());
    }
}
