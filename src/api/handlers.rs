use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::search::{
    AutocompleteResponse, CategoryCount, ExploreResponse, IndexStats, SearchCategory,
    SearchResponse, SettingEntry,
};
use crate::teams::TeamDraft;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

static ABBREVIATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9&\-\s]*$").expect("valid abbreviation pattern"));

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TeamRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 20), regex(path = *ABBREVIATION_RE))]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub leaders_ordering: LeadersOrdering,
    /// Omitted when creating the root team
    pub parent_id: Option<Uuid>,
    pub actor: Option<String>,
}

impl TeamRequest {
    fn draft(&self) -> TeamDraft {
        TeamDraft {
            name: self.name.trim().to_string(),
            abbreviation: self
                .abbreviation
                .as_deref()
                .map(str::trim)
                .filter(|abbr| !abbr.is_empty())
                .map(str::to_string),
            description: self.description.clone(),
            leaders_ordering: self.leaders_ordering,
        }
    }
}

/// Team with its place in the hierarchy
#[derive(Debug, Serialize)]
pub struct TeamResponse {
    #[serde(flatten)]
    pub team: Team,
    pub parent_id: Option<Uuid>,
}

async fn team_response(state: &AppState, team: Team) -> Result<TeamResponse> {
    let parent_id = state
        .teams
        .get_immediate_parent_team(&team)
        .await?
        .map(|parent| parent.id);
    Ok(TeamResponse { team, parent_id })
}

async fn require_team(state: &AppState, id: &Uuid) -> Result<Team> {
    state
        .teams
        .store()
        .get_team(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Team {} not found", id)))
}

/// Create a team, or the root team when no parent is given
pub async fn create_team(
    State(state): State<AppState>,
    Json(request): Json<TeamRequest>,
) -> Result<(StatusCode, Json<TeamResponse>)> {
    request.validate()?;

    let team = match request.parent_id {
        Some(parent_id) => {
            state
                .teams
                .create_team(request.draft(), parent_id, request.actor.clone())
                .await?
        }
        None => {
            state
                .teams
                .create_root_team(request.draft(), request.actor.clone())
                .await?
        }
    };
    state.search.index_team(&team.id).await?;

    Ok((StatusCode::CREATED, Json(team_response(&state, team).await?)))
}

/// List teams by name
pub async fn list_teams(State(state): State<AppState>) -> Result<Json<Vec<Team>>> {
    Ok(Json(state.teams.store().list_teams().await?))
}

pub async fn get_root_team(State(state): State<AppState>) -> Result<Json<TeamResponse>> {
    let root = state.teams.get_root_team().await?;
    Ok(Json(team_response(&state, root).await?))
}

/// Entries for a team picker
pub async fn team_select_data(
    State(state): State<AppState>,
) -> Result<Json<Vec<TeamSelectDatum>>> {
    Ok(Json(state.teams.get_team_select_data().await?))
}

pub async fn get_team(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TeamResponse>> {
    let team = require_team(&state, &id).await?;
    Ok(Json(team_response(&state, team).await?))
}

/// Apply an edit, moving the team when the parent changes
pub async fn update_team(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TeamRequest>,
) -> Result<Json<TeamResponse>> {
    request.validate()?;

    let team = state
        .teams
        .update_team(&id, request.draft(), request.parent_id, request.actor.clone())
        .await?;
    state.search.index_team(&team.id).await?;

    Ok(Json(team_response(&state, team).await?))
}

#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    pub actor: Option<String>,
}

pub async fn delete_team(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ActorQuery>,
) -> Result<StatusCode> {
    state.teams.delete_team(&id, params.actor).await?;
    state.search.index_team(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ChildTeamsQuery {
    /// Include every descendant, not just direct sub-teams
    #[serde(default)]
    pub all: bool,
}

pub async fn child_teams(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ChildTeamsQuery>,
) -> Result<Json<Vec<Team>>> {
    let team = require_team(&state, &id).await?;
    let children = if params.all {
        state.teams.get_all_child_teams(&team).await?
    } else {
        state.teams.get_immediate_child_teams(&team).await?
    };
    Ok(Json(children))
}

/// Ancestors, most distant first
pub async fn parent_teams(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Team>>> {
    let team = require_team(&state, &id).await?;
    Ok(Json(state.teams.get_all_parent_teams(&team).await?))
}

#[derive(Debug, Serialize)]
pub struct DeletabilityResponse {
    pub deletable: bool,
    pub reasons: Vec<String>,
}

pub async fn team_deletability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletabilityResponse>> {
    let team = require_team(&state, &id).await?;
    let (deletable, reasons) = state.teams.can_team_be_deleted(&team).await?;
    Ok(Json(DeletabilityResponse { deletable, reasons }))
}

/// Active members of the team and its sub-teams
pub async fn team_members(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TeamMember>>> {
    let team = require_team(&state, &id).await?;
    Ok(Json(state.teams.get_team_members(&team).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddMemberRequest {
    pub person_id: Uuid,
    #[validate(length(max = 255))]
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub head_of_team: bool,
    pub leaders_position: Option<u32>,
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<TeamMember>)> {
    request.validate()?;

    let mut member = TeamMember::new(request.person_id, id, request.job_title.trim());
    if request.head_of_team {
        member = member.as_head_of_team(request.leaders_position);
    }
    state.teams.add_member(&member).await?;

    state.search.index_team(&id).await?;
    state.search.index_person(&member.person_id).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    let member = state
        .teams
        .store()
        .members_of_teams(&[id])
        .await?
        .into_iter()
        .find(|member| member.id == member_id)
        .ok_or_else(|| AppError::NotFound(format!("Member {} not found", member_id)))?;
    state.teams.remove_member(&member).await?;

    state.search.index_team(&id).await?;
    state.search.index_person(&member.person_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ProfileCompletionResponse {
    pub team_id: Uuid,
    /// Share of people with a complete profile; absent for an empty team
    pub profile_completion: Option<f64>,
}

pub async fn profile_completion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProfileCompletionResponse>> {
    let team = require_team(&state, &id).await?;
    Ok(Json(ProfileCompletionResponse {
        team_id: id,
        profile_completion: state.teams.profile_completion(&team).await?,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PersonRequest {
    #[validate(length(min = 1, max = 200))]
    pub first_name: String,
    #[validate(length(min = 1, max = 200))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(range(max = 100))]
    #[serde(default)]
    pub profile_completion: u8,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn create_person(
    State(state): State<AppState>,
    Json(request): Json<PersonRequest>,
) -> Result<(StatusCode, Json<Person>)> {
    request.validate()?;

    let mut person = Person::new(request.first_name, request.last_name, request.email)
        .with_profile_completion(request.profile_completion);
    person.is_active = request.is_active;

    state.teams.save_person(&person).await?;
    state.search.index_person(&person.id).await?;
    Ok((StatusCode::CREATED, Json(person)))
}

pub async fn update_person(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PersonRequest>,
) -> Result<Json<Person>> {
    request.validate()?;

    let mut person = state
        .teams
        .store()
        .get_person(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Person {} not found", id)))?;
    person.first_name = request.first_name;
    person.last_name = request.last_name;
    person.email = request.email;
    person.profile_completion = request.profile_completion.min(100);
    person.is_active = request.is_active;

    state.teams.save_person(&person).await?;
    state.search.index_person(&person.id).await?;
    Ok(Json(person))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PageRequest {
    pub kind: PageKind,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Publish a page and make it searchable
pub async fn create_page(
    State(state): State<AppState>,
    Json(request): Json<PageRequest>,
) -> Result<(StatusCode, Json<Page>)> {
    request.validate()?;

    let mut page = Page::new(request.kind, request.title)
        .with_excerpt(request.excerpt)
        .with_body(request.body)
        .with_topics(request.topics);
    if let Some(published_at) = request.published_at {
        page = page.published_at(published_at);
    }

    state.stores.pages.save_page(&page).await?;
    state.search.index_page(&page.id).await?;
    Ok((StatusCode::CREATED, Json(page)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQueryParams {
    pub q: Option<String>,
    pub page: Option<usize>,
}

/// Search one category
pub async fn search(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<SearchResponse>> {
    let response = state
        .search
        .search_named(&category, params.q.as_deref(), params.page.unwrap_or(1))
        .await?;
    Ok(Json(response))
}

/// Result counts for every category
pub async fn search_counts(
    State(state): State<AppState>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<Vec<CategoryCount>>> {
    Ok(Json(state.search.category_counts(params.q.as_deref()).await?))
}

/// Top suggestions per category while the user types
pub async fn autocomplete(
    State(state): State<AppState>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<AutocompleteResponse>> {
    Ok(Json(state.search.autocomplete(params.q.as_deref()).await?))
}

pub async fn explore(
    State(state): State<AppState>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<ExploreResponse>> {
    Ok(Json(state.search.explore(params.q.as_deref()).await?))
}

pub async fn list_settings(State(state): State<AppState>) -> Result<Json<Vec<SettingEntry>>> {
    Ok(Json(state.search.settings().list()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SettingRequest {
    #[validate(length(min = 1, max = 100))]
    pub value: String,
}

pub async fn update_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<SettingRequest>,
) -> Result<Json<Vec<SettingEntry>>> {
    request.validate()?;
    state.search.set_setting(&key, request.value.trim()).await?;
    Ok(Json(state.search.settings().list()))
}

pub async fn reset_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<SettingEntry>>> {
    state.search.reset_setting(&key).await?;
    Ok(Json(state.search.settings().list()))
}

/// The query a category would run, as search engine DSL
pub async fn query_dsl(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<serde_json::Value>> {
    let category = SearchCategory::from_str(&category)
        .map_err(|_| AppError::Validation(format!("Unknown search category '{}'", category)))?;
    let dsl = state.search.query_dsl(category, params.q.as_deref()).await?;
    Ok(Json(dsl.unwrap_or(serde_json::Value::Null)))
}

pub async fn index_mapping(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.search.index_mapping()?))
}

#[derive(Debug, Serialize)]
pub struct ReindexResponse {
    pub indexed: usize,
}

/// Rebuild the search index from the stores
pub async fn reindex(State(state): State<AppState>) -> Result<Json<ReindexResponse>> {
    Ok(Json(ReindexResponse {
        indexed: state.search.reindex().await?,
    }))
}

pub async fn index_stats(State(state): State<AppState>) -> Result<Json<IndexStats>> {
    Ok(Json(state.search.get_stats().await?))
}

fn lookup_kind(kind: &str) -> Result<LookupKind> {
    LookupKind::from_str(kind)
        .map_err(|_| AppError::Validation(format!("Unknown curation kind '{}'", kind)))
}

#[derive(Debug, Deserialize)]
pub struct CurationTargetQuery {
    pub content_type: String,
    pub object_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CurationResponse {
    pub kind: LookupKind,
    pub target: ContentRef,
    pub phrases: Vec<String>,
}

pub async fn get_curation(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<CurationTargetQuery>,
) -> Result<Json<CurationResponse>> {
    let kind = lookup_kind(&kind)?;
    let target = ContentRef::new(params.content_type, params.object_id);
    let phrases = state.search.phrases_for(kind, &target).await?;
    Ok(Json(CurationResponse {
        kind,
        target,
        phrases,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CurationRequest {
    #[validate(length(min = 1))]
    pub content_type: String,
    pub object_id: Uuid,
    /// Comma-separated keywords and phrases
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub phrases: String,
}

/// Replace the phrases that pin or exclude an object
pub async fn update_curation(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<CurationRequest>,
) -> Result<Json<CurationResponse>> {
    request.validate()?;

    let kind = lookup_kind(&kind)?;
    let target = ContentRef::new(request.content_type, request.object_id);
    let phrases = match kind {
        LookupKind::Pin => {
            state
                .search
                .set_pinned_phrases(&target, &request.phrases)
                .await?
        }
        LookupKind::Exclusion => {
            state
                .search
                .set_excluded_phrases(&target, &request.phrases)
                .await?
        }
    };
    Ok(Json(CurationResponse {
        kind,
        target,
        phrases,
    }))
}
