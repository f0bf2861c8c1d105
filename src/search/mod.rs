//! Site search powered by Tantivy
//!
//! Queries are built per indexed model from field declarations and layered
//! boost settings, then compiled to Tantivy queries:
//!
//! ```text
//! ModelRegistry ──► QueryBuilder ──► QueryNode template ──► TantivyBackend
//!                        ▲                                       │
//!                 SearchSettings                                 ▼
//!                                      SearchService ◄── IndexManager
//!                                            ▲
//!                                     CurationService (pins, exclusions)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use digital_workspace::search::{SearchCategory, SearchConfig, SearchService};
//! use digital_workspace::state::create_in_memory_stores;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stores = create_in_memory_stores();
//! let service = SearchService::new(SearchConfig::default(), &stores).await?;
//! let response = service
//!     .search(SearchCategory::AllPages, Some("annual leave"), 1)
//!     .await?;
//! println!("{} results", response.total_hits);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod curation;
pub mod document;
pub mod error;
pub mod fields;
pub mod index;
pub mod query;
pub mod query_builder;
pub mod sanitize;
pub mod service;
pub mod settings;
pub mod types;

pub use config::{SearchConfig, SearchConfigBuilder};
pub use curation::CurationService;
pub use document::{PersonDocument, SearchDocument, TeamDocument};
pub use error::{SearchError, SearchResult};
pub use fields::{IndexedField, IndexedModel, ModelRegistry, RelatedFields};
pub use index::{IndexManager, IndexStats};
pub use query::{DecayFunction, QueryLeafInfo, QueryNode, ScoreFunction};
pub use query_builder::QueryBuilder;
pub use sanitize::{sanitize_search_query, split_query};
pub use service::{
    AutocompleteResponse, CategoryCount, ExploreResponse, ExploreSubQuery, SearchHit,
    SearchResponse, SearchService, AUTOCOMPLETE_LIMIT,
};
pub use settings::{SearchSettings, SettingEntry, SettingSource};
pub use types::{AnalysisType, SearchCategory, SearchQueryType};
