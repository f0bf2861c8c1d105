//! Declarations of what gets indexed for each searchable model
//!
//! A model declares [`IndexedField`]s (and [`RelatedFields`] for nested
//! objects). Subtype models name a parent and inherit its fields; the query
//! builder gives subtypes with fields of their own a dedicated query branch.

use crate::search::error::{SearchError, SearchResult};
use crate::search::query::ScoreFunction;
use crate::search::settings::field_boost_key;
use crate::search::types::AnalysisType;
use serde::Serialize;
use std::collections::BTreeMap;

pub const TEAM_MODEL: &str = "peoplefinder.team";
pub const PERSON_MODEL: &str = "peoplefinder.person";
pub const CONTENT_PAGE_MODEL: &str = "content.contentpage";
pub const NEWS_PAGE_MODEL: &str = "news.newspage";
pub const TOOL_MODEL: &str = "tools.tool";
pub const GUIDANCE_MODEL: &str = "working_at_dit.guidance";

/// One indexed attribute of a model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedField {
    /// Name in the index
    pub name: String,
    /// Attribute the value is read from when it differs from `name`
    pub model_field: Option<String>,
    pub boost: Option<f64>,
    pub tokenized: bool,
    pub explicit: bool,
    pub keyword: bool,
    pub fuzzy: bool,
    pub autocomplete: bool,
    pub proximity: bool,
    pub filter: bool,
}

impl IndexedField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_field: None,
            boost: None,
            tokenized: false,
            explicit: false,
            keyword: false,
            fuzzy: false,
            autocomplete: false,
            proximity: false,
            filter: false,
        }
    }

    pub fn model_field(mut self, model_field: impl Into<String>) -> Self {
        self.model_field = Some(model_field.into());
        self
    }

    pub fn boost(mut self, boost: f64) -> Self {
        self.boost = Some(boost);
        self
    }

    pub fn tokenized(mut self) -> Self {
        self.tokenized = true;
        self
    }

    pub fn explicit(mut self) -> Self {
        self.explicit = true;
        self
    }

    pub fn keyword(mut self) -> Self {
        self.keyword = true;
        self
    }

    pub fn fuzzy(mut self) -> Self {
        self.fuzzy = true;
        self
    }

    pub fn autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }

    pub fn proximity(mut self) -> Self {
        self.proximity = true;
        self
    }

    pub fn filter(mut self) -> Self {
        self.filter = true;
        self
    }

    /// Attribute of the source object holding the value
    pub fn source_name(&self) -> &str {
        self.model_field.as_deref().unwrap_or(&self.name)
    }

    /// Analyzers the field is searched with, in query order.
    ///
    /// Fuzzy matching runs against the tokenized field, so `fuzzy` implies
    /// `tokenized`.
    pub fn search_analyzers(&self) -> Vec<AnalysisType> {
        let mut analyzers = Vec::new();
        if self.fuzzy || self.tokenized {
            analyzers.push(AnalysisType::Tokenized);
        }
        if self.explicit {
            analyzers.push(AnalysisType::Explicit);
        }
        if self.keyword {
            analyzers.push(AnalysisType::Keyword);
        }
        analyzers
    }

    pub fn filter_analyzers(&self) -> Vec<AnalysisType> {
        let mut analyzers = Vec::new();
        if self.proximity {
            analyzers.push(AnalysisType::Proximity);
        }
        if self.filter {
            analyzers.push(AnalysisType::Filter);
        }
        analyzers
    }

    pub fn is_searchable(&self) -> bool {
        !self.search_analyzers().is_empty()
    }
}

/// Fields of a related object, indexed under a nested path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedFields {
    pub path: String,
    pub fields: Vec<IndexedField>,
}

impl RelatedFields {
    pub fn new(path: impl Into<String>, fields: Vec<IndexedField>) -> Self {
        Self {
            path: path.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSpec {
    Field(IndexedField),
    Related(RelatedFields),
}

impl FieldSpec {
    /// Leaf fields with their full dotted path
    pub fn leaves(&self) -> Vec<(String, &IndexedField)> {
        match self {
            FieldSpec::Field(field) => vec![(field.name.clone(), field)],
            FieldSpec::Related(related) => related
                .fields
                .iter()
                .map(|field| (format!("{}.{}", related.path, field.name), field))
                .collect(),
        }
    }
}

impl From<IndexedField> for FieldSpec {
    fn from(field: IndexedField) -> Self {
        FieldSpec::Field(field)
    }
}

impl From<RelatedFields> for FieldSpec {
    fn from(related: RelatedFields) -> Self {
        FieldSpec::Related(related)
    }
}

/// A searchable model and its own field declarations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedModel {
    /// Content type label in `app.model` form
    pub label: String,
    pub parent: Option<String>,
    pub fields: Vec<FieldSpec>,
    /// Score adjustments applied to this model's documents and its subtypes'
    pub score_functions: Vec<ScoreFunction>,
}

impl IndexedModel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            parent: None,
            fields: Vec::new(),
            score_functions: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn field(mut self, field: impl Into<FieldSpec>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn score_function(mut self, function: ScoreFunction) -> Self {
        self.score_functions.push(function);
        self
    }
}

/// A field as seen by a model, remembering which model declared it
#[derive(Debug, Clone, Copy)]
pub struct EffectiveField<'a> {
    pub definition_model: &'a str,
    pub spec: &'a FieldSpec,
}

/// Every searchable model, in registration order
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<IndexedModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the directory and content models
    pub fn with_builtin_models() -> Self {
        // declared parents-first
        Self {
            models: builtin_models(),
        }
    }

    pub fn register(&mut self, model: IndexedModel) -> SearchResult<()> {
        if self.models.iter().any(|m| m.label == model.label) {
            return Err(SearchError::InvalidConfiguration(format!(
                "Model '{}' is already registered",
                model.label
            )));
        }
        if let Some(parent) = &model.parent {
            self.get(parent)?;
        }
        self.models.push(model);
        Ok(())
    }

    pub fn models(&self) -> impl Iterator<Item = &IndexedModel> {
        self.models.iter()
    }

    pub fn get(&self, label: &str) -> SearchResult<&IndexedModel> {
        self.models
            .iter()
            .find(|m| m.label == label)
            .ok_or_else(|| SearchError::UnknownModel(label.to_string()))
    }

    /// The model and its ancestors, root first
    pub fn ancestry(&self, label: &str) -> SearchResult<Vec<&IndexedModel>> {
        let mut chain = Vec::new();
        let mut current = Some(self.get(label)?);
        while let Some(model) = current {
            if chain.iter().any(|m: &&IndexedModel| m.label == model.label) {
                return Err(SearchError::InvalidConfiguration(format!(
                    "Model '{}' inherits from itself",
                    model.label
                )));
            }
            chain.push(model);
            current = match &model.parent {
                Some(parent) => Some(self.get(parent)?),
                None => None,
            };
        }
        chain.reverse();
        Ok(chain)
    }

    /// Content type labels a document of this model is filed under
    pub fn content_types(&self, label: &str) -> SearchResult<Vec<String>> {
        Ok(self
            .ancestry(label)?
            .into_iter()
            .map(|m| m.label.clone())
            .collect())
    }

    /// Inherited fields followed by the model's own
    pub fn effective_fields(&self, label: &str) -> SearchResult<Vec<EffectiveField<'_>>> {
        Ok(self
            .ancestry(label)?
            .into_iter()
            .flat_map(|model| {
                model.fields.iter().map(move |spec| EffectiveField {
                    definition_model: model.label.as_str(),
                    spec,
                })
            })
            .collect())
    }

    /// Score functions declared by the model and its ancestors, root first
    pub fn effective_score_functions(&self, label: &str) -> SearchResult<Vec<&ScoreFunction>> {
        Ok(self
            .ancestry(label)?
            .into_iter()
            .flat_map(|model| model.score_functions.iter())
            .collect())
    }

    /// All models inheriting from `label`, directly or not
    pub fn descendants(&self, label: &str) -> Vec<&IndexedModel> {
        self.models
            .iter()
            .filter(|m| m.label != label)
            .filter(|m| {
                self.ancestry(&m.label)
                    .map(|chain| chain.iter().any(|a| a.label == label))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Descendants that declare fields of their own and so need their own query branch
    pub fn extended_models_with_unique_fields(&self, label: &str) -> Vec<&IndexedModel> {
        self.descendants(label)
            .into_iter()
            .filter(|m| !m.fields.is_empty())
            .collect()
    }

    /// Settings layer built from the boosts declared on fields
    pub fn declared_field_boosts(&self) -> BTreeMap<String, String> {
        let mut boosts = BTreeMap::new();
        for model in &self.models {
            for spec in &model.fields {
                for (path, field) in spec.leaves() {
                    if let Some(boost) = field.boost {
                        boosts.insert(field_boost_key(&model.label, &path), boost.to_string());
                    }
                }
            }
        }
        boosts
    }
}

fn builtin_models() -> Vec<IndexedModel> {
    vec![
        IndexedModel::new(TEAM_MODEL)
            .field(
                IndexedField::new("name")
                    .fuzzy()
                    .tokenized()
                    .explicit()
                    .autocomplete()
                    .boost(4.0),
            )
            .field(
                IndexedField::new("abbreviation")
                    .tokenized()
                    .explicit()
                    .keyword()
                    .boost(4.0),
            )
            .field(IndexedField::new("description").tokenized().explicit())
            .field(
                IndexedField::new("roles_in_team")
                    .tokenized()
                    .explicit()
                    .boost(2.0),
            ),
        IndexedModel::new(PERSON_MODEL)
            .field(
                IndexedField::new("full_name")
                    .fuzzy()
                    .tokenized()
                    .explicit()
                    .autocomplete()
                    .boost(7.0),
            )
            .field(
                IndexedField::new("first_name")
                    .fuzzy()
                    .tokenized()
                    .explicit()
                    .autocomplete()
                    .boost(7.0),
            )
            .field(
                IndexedField::new("last_name")
                    .fuzzy()
                    .tokenized()
                    .explicit()
                    .autocomplete()
                    .boost(7.0),
            )
            .field(IndexedField::new("email").keyword().boost(4.0))
            .field(RelatedFields::new(
                "roles",
                vec![IndexedField::new("job_title")
                    .tokenized()
                    .explicit()
                    .boost(3.0)],
            ))
            .score_function(ScoreFunction::linear(
                "profile_completion",
                100.0,
                5.0,
                50.0,
                0.95,
            )),
        IndexedModel::new(CONTENT_PAGE_MODEL)
            .field(
                IndexedField::new("search_title")
                    .model_field("title")
                    .tokenized()
                    .explicit()
                    .fuzzy()
                    .boost(5.0),
            )
            .field(
                IndexedField::new("search_content")
                    .model_field("body")
                    .tokenized()
                    .explicit(),
            )
            .field(IndexedField::new("excerpt").tokenized().explicit().boost(2.0))
            .field(RelatedFields::new(
                "topics",
                vec![IndexedField::new("title").tokenized().explicit()],
            )),
        IndexedModel::new(NEWS_PAGE_MODEL)
            .with_parent(CONTENT_PAGE_MODEL)
            .field(
                IndexedField::new("search_categories")
                    .model_field("topics")
                    .tokenized()
                    .autocomplete(),
            ),
        IndexedModel::new(TOOL_MODEL).with_parent(CONTENT_PAGE_MODEL).field(
            IndexedField::new("search_tool_name")
                .model_field("title")
                .fuzzy()
                .tokenized()
                .explicit()
                .autocomplete()
                .keyword()
                .boost(10.0),
        ),
        IndexedModel::new(GUIDANCE_MODEL).with_parent(CONTENT_PAGE_MODEL),
    ]
}
