//! Enumerations shared by the query builder, settings and search service

use crate::search::fields::{
    CONTENT_PAGE_MODEL, GUIDANCE_MODEL, NEWS_PAGE_MODEL, PERSON_MODEL, TEAM_MODEL, TOOL_MODEL,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Text-processing strategy applied to an indexed field
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisType {
    /// Stemmed words
    Tokenized,
    /// Lowercased words, no stemming
    Explicit,
    /// The whole value as one lowercased token
    Keyword,
    /// Filter-only, not valid in a full-text query
    Proximity,
    /// Filter-only, not valid in a full-text query
    Filter,
}

impl AnalysisType {
    /// Analyzers that can take part in a full-text query
    pub fn is_searchable(&self) -> bool {
        matches!(
            self,
            AnalysisType::Tokenized | AnalysisType::Explicit | AnalysisType::Keyword
        )
    }
}

/// How the user's text is matched against a field
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SearchQueryType {
    Phrase,
    QueryAnd,
    QueryOr,
    Fuzzy,
}

/// Result tabs offered by the search page
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SearchCategory {
    #[strum(to_string = "all_pages", serialize = "all")]
    AllPages,
    People,
    Teams,
    Guidance,
    Tools,
    News,
}

impl SearchCategory {
    /// Whether results are pages and can therefore be pinned
    pub fn is_page_category(&self) -> bool {
        !matches!(self, SearchCategory::People | SearchCategory::Teams)
    }

    /// Model whose query template serves the category
    pub fn model_label(&self) -> &'static str {
        match self {
            SearchCategory::AllPages | SearchCategory::Guidance => CONTENT_PAGE_MODEL,
            SearchCategory::People => PERSON_MODEL,
            SearchCategory::Teams => TEAM_MODEL,
            SearchCategory::Tools => TOOL_MODEL,
            SearchCategory::News => NEWS_PAGE_MODEL,
        }
    }

    /// Content type every result of the category must carry
    pub fn restrict_to(&self) -> &'static str {
        match self {
            SearchCategory::Guidance => GUIDANCE_MODEL,
            other => other.model_label(),
        }
    }
}
