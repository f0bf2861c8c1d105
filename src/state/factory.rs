use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{CurationStore, DirectoryStore, InMemoryStore, PageStore, SettingStore, SledStore};
use std::sync::Arc;

/// One backend seen through each of the store traits
#[derive(Clone)]
pub struct Stores {
    pub directory: Arc<dyn DirectoryStore>,
    pub curation: Arc<dyn CurationStore>,
    pub settings: Arc<dyn SettingStore>,
    pub pages: Arc<dyn PageStore>,
}

impl Stores {
    fn from_backend<S>(store: S) -> Self
    where
        S: DirectoryStore + CurationStore + SettingStore + PageStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            directory: store.clone(),
            curation: store.clone(),
            settings: store.clone(),
            pages: store,
        }
    }
}

/// Create the stores based on configuration
pub fn create_stores(config: &StateConfig) -> Result<Stores> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled storage backend");

            Ok(Stores::from_backend(SledStore::new(path)?))
        }

        StateBackend::Memory => Ok(create_in_memory_stores()),
    }
}

/// Create in-memory stores (for testing and development)
pub fn create_in_memory_stores() -> Stores {
    tracing::info!("Initializing in-memory storage backend");
    Stores::from_backend(InMemoryStore::new())
}
