//! Error types for search operations

use crate::error::AppError;
use crate::search::types::AnalysisType;

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors that can occur during search operations
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Index initialization failed
    #[error("Index initialization failed: {0}")]
    IndexInitFailed(String),

    /// Search execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),

    /// Document indexing failed
    #[error("Document indexing failed: {0}")]
    IndexingFailed(String),

    /// An analyzer that cannot take part in a full-text query was requested
    #[error("{0} is not a valid AnalysisType for a query")]
    InvalidAnalysisType(AnalysisType),

    /// A model label with no search declaration
    #[error("No indexed model registered as '{0}'")]
    UnknownModel(String),

    /// A query template still held a placeholder when compiled
    #[error("Query still contains the '{0}' placeholder")]
    UnboundVariable(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Failure reported by a store
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    TantivyError(String),
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::TantivyError(err.to_string())
    }
}

impl From<tantivy::directory::error::OpenDirectoryError> for SearchError {
    fn from(err: tantivy::directory::error::OpenDirectoryError) -> Self {
        SearchError::IndexInitFailed(err.to_string())
    }
}

impl From<AppError> for SearchError {
    fn from(err: AppError) -> Self {
        SearchError::Storage(err.to_string())
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidConfiguration(msg) => AppError::Configuration(msg),
            SearchError::InvalidAnalysisType(_) => AppError::Configuration(err.to_string()),
            SearchError::UnknownModel(_) => AppError::NotFound(err.to_string()),
            SearchError::Storage(msg) => AppError::Database(msg),
            SearchError::IoError(err) => AppError::Io(err),
            _ => AppError::Internal(err.to_string()),
        }
    }
}
