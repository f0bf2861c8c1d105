use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Kinds of published content that take part in search
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, EnumString, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PageKind {
    Content,
    News,
    Tool,
    Guidance,
}

impl PageKind {
    /// Content type label used to register the kind with the search index
    pub fn content_type(&self) -> &'static str {
        match self {
            PageKind::Content => "content.contentpage",
            PageKind::News => "news.newspage",
            PageKind::Tool => "tools.tool",
            PageKind::Guidance => "working_at_dit.guidance",
        }
    }
}

/// A published piece of content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub id: Uuid,
    pub kind: PageKind,
    pub title: String,
    pub excerpt: String,
    pub body: String,
    /// Topic names the page is tagged with
    pub topics: Vec<String>,
    pub published_at: DateTime<Utc>,
}

impl Page {
    pub fn new(kind: PageKind, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            excerpt: String::new(),
            body: String::new(),
            topics: Vec::new(),
            published_at: Utc::now(),
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    pub fn published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = published_at;
        self
    }
}
