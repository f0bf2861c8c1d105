use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Reference to any searchable object, by content type label and id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentRef {
    /// Content type label in `app.model` form (e.g. `news.newspage`)
    pub content_type: String,
    pub object_id: Uuid,
}

impl ContentRef {
    pub fn new(content_type: impl Into<String>, object_id: Uuid) -> Self {
        Self {
            content_type: content_type.into(),
            object_id,
        }
    }

    /// Identifier used for the document in the search index
    pub fn document_id(&self) -> String {
        format!("{}:{}", self.content_type, self.object_id)
    }
}

/// A curated keyword or phrase that pins or excludes content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchKeywordOrPhrase {
    pub id: Uuid,
    pub keyword_or_phrase: String,
}

impl SearchKeywordOrPhrase {
    pub fn new(keyword_or_phrase: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            keyword_or_phrase: keyword_or_phrase.into(),
        }
    }
}

/// Whether a lookup forces content into or out of results
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LookupKind {
    Pin,
    Exclusion,
}

/// Links a keyword or phrase to a pinned or excluded object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurationLookup {
    pub id: Uuid,
    pub kind: LookupKind,
    pub keyword_id: Uuid,
    pub target: ContentRef,
}

impl CurationLookup {
    pub fn new(kind: LookupKind, keyword_id: Uuid, target: ContentRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            keyword_id,
            target,
        }
    }
}

/// Normalise a curated keyword or phrase: lowercase, quotes stripped, trimmed
pub fn normalize_keyword_or_phrase(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['\'', '"'], "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keyword_or_phrase() {
        assert_eq!(normalize_keyword_or_phrase("  'Annual Leave' "), "annual leave");
        assert_eq!(normalize_keyword_or_phrase("\"HR\""), "hr");
        assert_eq!(normalize_keyword_or_phrase("   "), "");
    }

    #[test]
    fn test_document_id() {
        let id = Uuid::nil();
        let content = ContentRef::new("news.newspage", id);
        assert_eq!(
            content.document_id(),
            "news.newspage:00000000-0000-0000-0000-000000000000"
        );
    }
}
