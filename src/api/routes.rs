use crate::api::{handlers, AppState};
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.request_timeout();
    let api = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::health_check))
        // Team hierarchy
        .route("/v1/teams", post(handlers::create_team))
        .route("/v1/teams", get(handlers::list_teams))
        .route("/v1/teams/root", get(handlers::get_root_team))
        .route("/v1/teams/select-data", get(handlers::team_select_data))
        .route("/v1/teams/:id", get(handlers::get_team))
        .route("/v1/teams/:id", put(handlers::update_team))
        .route("/v1/teams/:id", delete(handlers::delete_team))
        .route("/v1/teams/:id/children", get(handlers::child_teams))
        .route("/v1/teams/:id/parents", get(handlers::parent_teams))
        .route("/v1/teams/:id/deletable", get(handlers::team_deletability))
        .route("/v1/teams/:id/members", get(handlers::team_members))
        .route("/v1/teams/:id/members", post(handlers::add_member))
        .route(
            "/v1/teams/:id/members/:member_id",
            delete(handlers::remove_member),
        )
        .route(
            "/v1/teams/:id/profile-completion",
            get(handlers::profile_completion),
        )
        // People and pages
        .route("/v1/people", post(handlers::create_person))
        .route("/v1/people/:id", put(handlers::update_person))
        .route("/v1/pages", post(handlers::create_page))
        // Search
        .route("/v1/search", get(handlers::search_counts))
        .route("/v1/search/explore", get(handlers::explore))
        .route("/v1/search/autocomplete", get(handlers::autocomplete))
        .route("/v1/search/settings", get(handlers::list_settings))
        .route("/v1/search/settings/:key", put(handlers::update_setting))
        .route("/v1/search/settings/:key", delete(handlers::reset_setting))
        .route("/v1/search/mapping", get(handlers::index_mapping))
        .route("/v1/search/reindex", post(handlers::reindex))
        .route("/v1/search/stats", get(handlers::index_stats))
        .route("/v1/search/curation/:kind", get(handlers::get_curation))
        .route("/v1/search/curation/:kind", put(handlers::update_curation))
        .route("/v1/search/dsl/:category", get(handlers::query_dsl))
        .route("/v1/search/:category", get(handlers::search))
        // Add state
        .with_state(state);

    with_middleware(api, request_timeout)
}

/// Request deadline, tracing and CORS shared by every route
pub fn with_middleware(router: Router, request_timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
