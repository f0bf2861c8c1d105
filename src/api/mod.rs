pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::config::Config;
use crate::error::Result;
use crate::search::SearchService;
use crate::state::{AppCache, Stores};
use crate::teams::TeamService;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub teams: Arc<TeamService>,
    pub search: Arc<SearchService>,
    pub stores: Stores,
    request_timeout: Duration,
    started_at: Instant,
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl AppState {
    pub fn new(teams: Arc<TeamService>, search: Arc<SearchService>, stores: Stores) -> Self {
        Self {
            teams,
            search,
            stores,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            started_at: Instant::now(),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Deadline after which a request is answered with 408
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Wire the services over already opened stores
    pub async fn from_config(config: &Config, stores: Stores) -> Result<Self> {
        let profile_completion_cache = AppCache::new(
            config.cache.max_capacity,
            Duration::from_secs(config.cache.profile_completion_ttl_secs),
        );
        let teams = Arc::new(TeamService::new(
            stores.directory.clone(),
            profile_completion_cache,
        ));
        let search = Arc::new(SearchService::new(config.search.clone(), &stores).await?);

        Ok(Self::new(teams, search, stores)
            .with_request_timeout(Duration::from_secs(config.server.request_timeout_secs)))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
