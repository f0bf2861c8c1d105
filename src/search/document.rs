//! Search document structures and indexing

use crate::models::{ContentRef, Page, Person, Team};
use crate::search::error::SearchResult;
use crate::search::fields::{FieldSpec, IndexedField, ModelRegistry, PERSON_MODEL, TEAM_MODEL};
use crate::search::types::AnalysisType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tantivy::schema::*;
use tantivy::TantivyDocument;
use uuid::Uuid;

/// Tokenizer for whole-value, lowercased keyword fields
pub const KEYWORD_TOKENIZER: &str = "keyword_lower";
/// Lowercased edge n-grams of a single word, for search-as-you-type
pub const AUTOCOMPLETE_TOKENIZER: &str = "autocomplete_edge";
/// Longest prefix indexed for autocompletion
pub const AUTOCOMPLETE_MAX_GRAM: usize = 15;

pub const ID_FIELD: &str = "id";
pub const OBJECT_ID_FIELD: &str = "object_id";
/// The model label and every ancestor label of the document
pub const CONTENT_TYPE_FIELD: &str = "content_type";
/// The document's own model label
pub const DJANGO_CT_FIELD: &str = "django_ct";
pub const TITLE_FIELD: &str = "title";
pub const PUBLISHED_AT_FIELD: &str = "published_at";

/// Trait for objects that can be indexed and searched
pub trait SearchDocument: Send + Sync {
    /// Content type label of the indexed model
    fn model_label(&self) -> &str;

    fn object_id(&self) -> Uuid;

    /// Display title stored with the document
    fn title(&self) -> String;

    fn published_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Values of an attribute; related attributes use a dotted path
    fn values(&self, source: &str) -> Vec<String>;

    /// Numeric attribute read by score functions
    fn numeric_value(&self, _source: &str) -> Option<f64> {
        None
    }

    fn content_ref(&self) -> ContentRef {
        ContentRef::new(self.model_label(), self.object_id())
    }

    /// Get document ID
    fn document_id(&self) -> String {
        self.content_ref().document_id()
    }

    /// Convert to Tantivy document
    fn to_tantivy_doc(
        &self,
        schema: &Schema,
        registry: &ModelRegistry,
    ) -> SearchResult<TantivyDocument> {
        let mut doc = TantivyDocument::new();

        if let Ok(field) = schema.get_field(ID_FIELD) {
            doc.add_text(field, self.document_id());
        }
        if let Ok(field) = schema.get_field(OBJECT_ID_FIELD) {
            doc.add_text(field, self.object_id().to_string());
        }
        if let Ok(field) = schema.get_field(CONTENT_TYPE_FIELD) {
            for label in registry.content_types(self.model_label())? {
                doc.add_text(field, label);
            }
        }
        if let Ok(field) = schema.get_field(DJANGO_CT_FIELD) {
            doc.add_text(field, self.model_label());
        }
        if let Ok(field) = schema.get_field(TITLE_FIELD) {
            doc.add_text(field, self.title());
        }
        if let (Some(published_at), Ok(field)) =
            (self.published_at(), schema.get_field(PUBLISHED_AT_FIELD))
        {
            doc.add_i64(field, published_at.timestamp());
        }

        for effective in registry.effective_fields(self.model_label())? {
            for (path, source, indexed) in source_leaves(effective.spec) {
                let values = self.values(&source);
                if values.is_empty() {
                    continue;
                }
                let analyzers = indexed
                    .search_analyzers()
                    .into_iter()
                    .chain(indexed.filter_analyzers());
                for analyzer in analyzers {
                    if let Ok(field) = schema.get_field(&schema_field_name(&path, analyzer)) {
                        for value in &values {
                            doc.add_text(field, value);
                        }
                    }
                }
                if indexed.autocomplete {
                    if let Ok(field) = schema.get_field(&autocomplete_field_name(&path)) {
                        // edge n-grams are taken per word, so each word is its own value
                        for word in values.iter().flat_map(|value| autocomplete_words(value)) {
                            doc.add_text(field, word);
                        }
                    }
                }
            }
        }

        let mut scored = Vec::new();
        for function in registry.effective_score_functions(self.model_label())? {
            if scored.contains(&function.field.as_str()) {
                continue;
            }
            scored.push(function.field.as_str());
            if let (Some(value), Ok(field)) = (
                self.numeric_value(&function.field),
                schema.get_field(&numeric_field_name(&function.field)),
            ) {
                doc.add_f64(field, value);
            }
        }

        Ok(doc)
    }
}

/// Leaf fields with their index path and the attribute path they read from
pub fn source_leaves(spec: &FieldSpec) -> Vec<(String, String, &IndexedField)> {
    match spec {
        FieldSpec::Field(field) => vec![(
            field.name.clone(),
            field.source_name().to_string(),
            field,
        )],
        FieldSpec::Related(related) => related
            .fields
            .iter()
            .map(|field| {
                (
                    format!("{}.{}", related.path, field.name),
                    format!("{}.{}", related.path, field.source_name()),
                    field,
                )
            })
            .collect(),
    }
}

/// Name of the tantivy field holding `path` analyzed with `analyzer`
pub fn schema_field_name(path: &str, analyzer: AnalysisType) -> String {
    format!("{}__{}", path.replace('.', "__"), analyzer)
}

/// Name of the edge n-gram field holding `path` for autocompletion
pub fn autocomplete_field_name(path: &str) -> String {
    format!("{}__autocomplete", path.replace('.', "__"))
}

/// Words of a value as autocompletion indexes and matches them
pub fn autocomplete_words(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
}

/// Name of the fast field a score function reads `path` from
pub fn numeric_field_name(path: &str) -> String {
    format!("{}__numeric", path.replace('.', "__"))
}

/// Tokenizer and indexing options for an analyzer
fn text_options(analyzer: AnalysisType) -> TextOptions {
    match analyzer {
        AnalysisType::Tokenized => TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        ),
        AnalysisType::Explicit => TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("default")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        ),
        AnalysisType::Keyword => TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(KEYWORD_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqs),
        ),
        AnalysisType::Proximity | AnalysisType::Filter => STRING.into(),
    }
}

/// Build the search schema for every registered model
pub fn build_schema(registry: &ModelRegistry) -> Schema {
    let mut schema_builder = Schema::builder();

    schema_builder.add_text_field(ID_FIELD, STRING | STORED);
    schema_builder.add_text_field(OBJECT_ID_FIELD, STRING | STORED);
    schema_builder.add_text_field(CONTENT_TYPE_FIELD, STRING | STORED);
    schema_builder.add_text_field(DJANGO_CT_FIELD, STRING | STORED);
    schema_builder.add_text_field(TITLE_FIELD, STORED);
    schema_builder.add_i64_field(PUBLISHED_AT_FIELD, INDEXED | STORED | FAST);

    let mut seen = std::collections::HashSet::new();
    for model in registry.models() {
        for spec in &model.fields {
            for (path, _, indexed) in source_leaves(spec) {
                let analyzers = indexed
                    .search_analyzers()
                    .into_iter()
                    .chain(indexed.filter_analyzers());
                for analyzer in analyzers {
                    let name = schema_field_name(&path, analyzer);
                    if seen.insert(name.clone()) {
                        schema_builder.add_text_field(&name, text_options(analyzer));
                    }
                }
                let name = autocomplete_field_name(&path);
                if indexed.autocomplete && seen.insert(name.clone()) {
                    schema_builder.add_text_field(
                        &name,
                        TextOptions::default().set_indexing_options(
                            TextFieldIndexing::default()
                                .set_tokenizer(AUTOCOMPLETE_TOKENIZER)
                                .set_index_option(IndexRecordOption::WithFreqs),
                        ),
                    );
                }
            }
        }
        for function in &model.score_functions {
            let name = numeric_field_name(&function.field);
            if seen.insert(name.clone()) {
                schema_builder.add_f64_field(&name, FAST);
            }
        }
    }

    schema_builder.build()
}

/// A team with the job titles held in it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDocument {
    pub team: Team,
    pub roles_in_team: Vec<String>,
}

impl SearchDocument for TeamDocument {
    fn model_label(&self) -> &str {
        TEAM_MODEL
    }

    fn object_id(&self) -> Uuid {
        self.team.id
    }

    fn title(&self) -> String {
        self.team.name.clone()
    }

    fn values(&self, source: &str) -> Vec<String> {
        match source {
            "name" => vec![self.team.name.clone()],
            "abbreviation" => self.team.abbreviation.clone().into_iter().collect(),
            "description" => vec![self.team.description.clone()],
            "roles_in_team" => self.roles_in_team.clone(),
            _ => Vec::new(),
        }
    }
}

/// A person with their job titles across teams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonDocument {
    pub person: Person,
    pub job_titles: Vec<String>,
}

impl SearchDocument for PersonDocument {
    fn model_label(&self) -> &str {
        PERSON_MODEL
    }

    fn object_id(&self) -> Uuid {
        self.person.id
    }

    fn title(&self) -> String {
        self.person.full_name()
    }

    fn values(&self, source: &str) -> Vec<String> {
        match source {
            "full_name" => vec![self.person.full_name()],
            "first_name" => vec![self.person.first_name.clone()],
            "last_name" => vec![self.person.last_name.clone()],
            "email" => vec![self.person.email.clone()],
            "roles.job_title" => self.job_titles.clone(),
            _ => Vec::new(),
        }
    }

    fn numeric_value(&self, source: &str) -> Option<f64> {
        match source {
            "profile_completion" => Some(f64::from(self.person.profile_completion)),
            _ => None,
        }
    }
}

impl SearchDocument for Page {
    fn model_label(&self) -> &str {
        self.kind.content_type()
    }

    fn object_id(&self) -> Uuid {
        self.id
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn published_at(&self) -> Option<DateTime<Utc>> {
        Some(self.published_at)
    }

    fn values(&self, source: &str) -> Vec<String> {
        match source {
            "title" => vec![self.title.clone()],
            "body" => vec![self.body.clone()],
            "excerpt" => vec![self.excerpt.clone()],
            "topics" | "topics.title" => self.topics.clone(),
            _ => Vec::new(),
        }
        .into_iter()
        .filter(|value| !value.is_empty())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageKind;
    use crate::search::fields::NEWS_PAGE_MODEL;

    #[test]
    fn test_schema_has_a_field_per_analyzer() {
        let schema = build_schema(&ModelRegistry::with_builtin_models());

        assert!(schema.get_field("name__tokenized").is_ok());
        assert!(schema.get_field("name__explicit").is_ok());
        assert!(schema.get_field("abbreviation__keyword").is_ok());
        assert!(schema.get_field("roles__job_title__explicit").is_ok());
        assert!(schema.get_field("search_tool_name__keyword").is_ok());
        assert!(schema.get_field("email__tokenized").is_err());

        assert!(schema.get_field("full_name__autocomplete").is_ok());
        assert!(schema.get_field("search_tool_name__autocomplete").is_ok());
        assert!(schema.get_field("description__autocomplete").is_err());
    }

    #[test]
    fn test_autocomplete_indexes_each_word() {
        let registry = ModelRegistry::with_builtin_models();
        let schema = build_schema(&registry);
        let team = Team::new("Digital, Data and Technology");
        let doc = TeamDocument {
            team,
            roles_in_team: Vec::new(),
        }
        .to_tantivy_doc(&schema, &registry)
        .unwrap();

        let field = schema.get_field("name__autocomplete").unwrap();
        let words: Vec<&str> = doc.get_all(field).filter_map(|v| v.as_str()).collect();
        assert_eq!(words, vec!["Digital", "Data", "and", "Technology"]);
    }

    #[test]
    fn test_page_document_reads_model_fields() {
        let registry = ModelRegistry::with_builtin_models();
        let schema = build_schema(&registry);
        let page = Page::new(PageKind::News, "Budget announced")
            .with_topics(vec!["Finance".to_string()]);

        assert_eq!(page.model_label(), NEWS_PAGE_MODEL);
        assert_eq!(page.values("title"), vec!["Budget announced".to_string()]);
        assert!(page.values("excerpt").is_empty());

        let doc = page.to_tantivy_doc(&schema, &registry).unwrap();
        let content_type = schema.get_field(CONTENT_TYPE_FIELD).unwrap();
        let labels: Vec<&str> = doc.get_all(content_type).filter_map(|v| v.as_str()).collect();
        assert_eq!(labels, vec!["content.contentpage", "news.newspage"]);

        let categories = schema.get_field("search_categories__tokenized").unwrap();
        assert_eq!(doc.get_first(categories).and_then(|v| v.as_str()), Some("Finance"));
    }

    #[test]
    fn test_person_document_id() {
        let person = Person::new("Ada", "Lovelace", "ada@example.gov.uk");
        let doc = PersonDocument {
            person: person.clone(),
            job_titles: vec!["Analyst".to_string()],
        };

        assert_eq!(doc.document_id(), format!("peoplefinder.person:{}", person.id));
        assert_eq!(doc.values("roles.job_title"), vec!["Analyst".to_string()]);
        assert_eq!(doc.title(), "Ada Lovelace");
    }

    #[test]
    fn test_person_document_carries_profile_completion() {
        let registry = ModelRegistry::with_builtin_models();
        let schema = build_schema(&registry);
        let doc = PersonDocument {
            person: Person::new("Ada", "Lovelace", "ada@example.gov.uk").with_profile_completion(60),
            job_titles: Vec::new(),
        };

        let field = schema.get_field("profile_completion__numeric").unwrap();
        let tantivy_doc = doc.to_tantivy_doc(&schema, &registry).unwrap();
        assert_eq!(tantivy_doc.get_first(field).and_then(|v| v.as_f64()), Some(60.0));

        let page = Page::new(PageKind::Content, "Leave");
        let page_doc = page.to_tantivy_doc(&schema, &registry).unwrap();
        assert!(page_doc.get_first(field).is_none());
    }
}
