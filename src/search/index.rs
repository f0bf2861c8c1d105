//! Search index management

use crate::search::config::SearchConfig;
use crate::search::document::{
    build_schema, SearchDocument, AUTOCOMPLETE_MAX_GRAM, AUTOCOMPLETE_TOKENIZER, ID_FIELD,
    KEYWORD_TOKENIZER,
};
use crate::search::error::{SearchError, SearchResult};
use crate::search::fields::ModelRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::collector::Count;
use tantivy::schema::Schema;
use tantivy::tokenizer::{LowerCaser, NgramTokenizer, RawTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Total number of documents in the index
    pub total_documents: u64,

    /// Index size in bytes (0 for an in-memory index)
    pub index_size_bytes: u64,

    /// Number of segments
    pub num_segments: usize,
}

/// Manages the Tantivy search index
pub struct IndexManager {
    /// The Tantivy index
    index: Index,

    /// The schema
    schema: Schema,

    /// Index writer (wrapped in RwLock for thread-safety)
    writer: Arc<RwLock<IndexWriter>>,

    /// Index reader
    reader: IndexReader,

    /// Directory of a persistent index
    path: Option<PathBuf>,
}

impl IndexManager {
    /// Open the index at the configured path, or create one in memory
    pub async fn new(config: &SearchConfig, registry: &ModelRegistry) -> SearchResult<Self> {
        let schema = build_schema(registry);

        let index = match &config.index_path {
            Some(path) => {
                std::fs::create_dir_all(path).map_err(|e| {
                    SearchError::IndexInitFailed(format!("Failed to create index directory: {}", e))
                })?;
                if Self::index_exists(path) {
                    Index::open_in_dir(path).map_err(|e| {
                        SearchError::IndexInitFailed(format!("Failed to open existing index: {}", e))
                    })?
                } else {
                    Index::create_in_dir(path, schema.clone()).map_err(|e| {
                        SearchError::IndexInitFailed(format!("Failed to create new index: {}", e))
                    })?
                }
            }
            None => Index::create_in_ram(schema.clone()),
        };

        index.tokenizers().register(
            KEYWORD_TOKENIZER,
            TextAnalyzer::builder(RawTokenizer::default())
                .filter(LowerCaser)
                .build(),
        );
        let edge_ngrams = NgramTokenizer::prefix_only(1, AUTOCOMPLETE_MAX_GRAM).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to build autocomplete tokenizer: {}", e))
        })?;
        index.tokenizers().register(
            AUTOCOMPLETE_TOKENIZER,
            TextAnalyzer::builder(edge_ngrams).filter(LowerCaser).build(),
        );

        let writer = index
            .writer(config.writer_heap_size)
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create writer: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create reader: {}", e)))?;

        info!(
            path = ?config.index_path,
            fields = schema.fields().count(),
            "Search index ready"
        );

        Ok(Self {
            schema: index.schema(),
            index,
            writer: Arc::new(RwLock::new(writer)),
            reader,
            path: config.index_path.clone(),
        })
    }

    /// Check if an index exists at the given path
    fn index_exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }

    /// Get the schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get the index
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Get the reader
    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    fn id_term(&self, document_id: &str) -> Option<tantivy::Term> {
        self.schema
            .get_field(ID_FIELD)
            .ok()
            .map(|field| tantivy::Term::from_field_text(field, document_id))
    }

    fn commit_and_reload(&self, writer: &mut IndexWriter) -> SearchResult<()> {
        writer
            .commit()
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to commit: {}", e)))?;
        self.reader
            .reload()
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to reload reader: {}", e)))
    }

    /// Index (or re-index) a single document
    pub async fn index_document(
        &self,
        document: &dyn SearchDocument,
        registry: &ModelRegistry,
    ) -> SearchResult<()> {
        let tantivy_doc = document.to_tantivy_doc(&self.schema, registry)?;

        let mut writer = self.writer.write().await;

        // Delete existing document with same ID first
        if let Some(term) = self.id_term(&document.document_id()) {
            writer.delete_term(term);
        }

        writer
            .add_document(tantivy_doc)
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to add document: {}", e)))?;

        self.commit_and_reload(&mut writer)?;
        debug!(document_id = %document.document_id(), "Indexed document");
        Ok(())
    }

    /// Index multiple documents with one commit
    pub async fn index_documents(
        &self,
        documents: &[Box<dyn SearchDocument>],
        registry: &ModelRegistry,
    ) -> SearchResult<usize> {
        let mut writer = self.writer.write().await;
        let mut indexed = 0;

        for document in documents {
            let tantivy_doc = document.to_tantivy_doc(&self.schema, registry)?;

            if let Some(term) = self.id_term(&document.document_id()) {
                writer.delete_term(term);
            }

            writer.add_document(tantivy_doc).map_err(|e| {
                SearchError::IndexingFailed(format!("Failed to add document {}: {}", indexed, e))
            })?;

            indexed += 1;
        }

        self.commit_and_reload(&mut writer)?;
        Ok(indexed)
    }

    /// Delete a document by ID
    pub async fn delete_document(&self, document_id: &str) -> SearchResult<()> {
        let mut writer = self.writer.write().await;

        if let Some(term) = self.id_term(document_id) {
            writer.delete_term(term);
            self.commit_and_reload(&mut writer)?;
        }

        Ok(())
    }

    /// Clear the entire index
    pub async fn clear_index(&self) -> SearchResult<()> {
        let mut writer = self.writer.write().await;
        writer.delete_all_documents().map_err(|e| {
            SearchError::IndexingFailed(format!("Failed to clear index: {}", e))
        })?;
        self.commit_and_reload(&mut writer)
    }

    /// Get index statistics
    pub async fn get_stats(&self) -> SearchResult<IndexStats> {
        let searcher = self.reader.searcher();

        let total_documents = searcher
            .search(&tantivy::query::AllQuery, &Count)
            .map_err(|e| SearchError::SearchFailed(format!("Failed to count documents: {}", e)))?
            as u64;

        let num_segments = searcher.segment_readers().len();

        let index_size_bytes = self
            .path
            .as_ref()
            .and_then(|path| std::fs::read_dir(path).ok())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);

        Ok(IndexStats {
            total_documents,
            index_size_bytes,
            num_segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Page, PageKind};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_index_creation() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchConfig {
            index_path: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };

        let manager = IndexManager::new(&config, &ModelRegistry::with_builtin_models()).await;
        assert!(manager.is_ok());
    }

    #[tokio::test]
    async fn test_reindexing_replaces_document() {
        let registry = ModelRegistry::with_builtin_models();
        let manager = IndexManager::new(&SearchConfig::default(), &registry)
            .await
            .unwrap();

        let page = Page::new(PageKind::Content, "Annual leave");
        manager.index_document(&page, &registry).await.unwrap();
        manager.index_document(&page, &registry).await.unwrap();
        assert_eq!(manager.get_stats().await.unwrap().total_documents, 1);

        manager
            .delete_document(&page.document_id())
            .await
            .unwrap();
        assert_eq!(manager.get_stats().await.unwrap().total_documents, 0);
    }

    #[tokio::test]
    async fn test_persistent_index_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchConfig {
            index_path: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let registry = ModelRegistry::with_builtin_models();

        {
            let manager = IndexManager::new(&config, &registry).await.unwrap();
            manager
                .index_document(&Page::new(PageKind::Tool, "Expenses"), &registry)
                .await
                .unwrap();
        }

        let reopened = IndexManager::new(&config, &registry).await.unwrap();
        let stats = reopened.get_stats().await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert!(stats.index_size_bytes > 0);
    }
}
