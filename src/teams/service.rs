use crate::error::{AppError, Result};
use crate::models::{
    AuditAction, AuditLog, LeadersOrdering, Person, Team, TeamMember, TeamSelectDatum,
    TeamTreeEntry,
};
use crate::state::{DirectoryStore, ProfileCompletionCache};
use crate::teams::{slugify, TeamServiceError};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const AUDIT_OBJECT_TYPE: &str = "team";

/// Editable fields of a team, as submitted by a create or edit form
#[derive(Debug, Clone, Default)]
pub struct TeamDraft {
    pub name: String,
    pub abbreviation: Option<String>,
    pub description: String,
    pub leaders_ordering: LeadersOrdering,
}

/// Maintains the team hierarchy as a closure table.
///
/// Every registered team has a `(team, team, 0)` row and one row per ancestor
/// whose depth is the number of edges between them. Writes to the hierarchy
/// are serialised through a single lock so two reparents can never interleave.
pub struct TeamService {
    store: Arc<dyn DirectoryStore>,
    profile_completion_cache: ProfileCompletionCache,
    hierarchy_lock: Mutex<()>,
}

impl TeamService {
    pub fn new(store: Arc<dyn DirectoryStore>, profile_completion_cache: ProfileCompletionCache) -> Self {
        Self {
            store,
            profile_completion_cache,
            hierarchy_lock: Mutex::new(()),
        }
    }

    /// Get a reference to the underlying store
    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    /// Register a team in the hierarchy under `parent`.
    ///
    /// The root is registered with itself as parent.
    pub async fn add_team(&self, team: &Team, parent: &Team) -> Result<()> {
        let _guard = self.hierarchy_lock.lock().await;
        self.register(team.id, parent.id).await?;
        Ok(())
    }

    async fn register(&self, team_id: Uuid, parent_id: Uuid) -> Result<Vec<TeamTreeEntry>> {
        if !self.store.tree_rows_for_child(&team_id).await?.is_empty() {
            return Err(TeamServiceError::AlreadyRegistered.into());
        }
        if team_id == parent_id && !self.store.tree_rows_at_depth(0).await?.is_empty() {
            return Err(TeamServiceError::RootExists.into());
        }

        let ancestry = self.store.tree_rows_for_child(&parent_id).await?;

        let mut rows = Vec::with_capacity(ancestry.len() + 1);
        rows.push(TeamTreeEntry::new(team_id, team_id, 0));
        rows.extend(
            ancestry
                .iter()
                .filter(|row| row.child != team_id)
                .map(|row| TeamTreeEntry::new(row.parent, team_id, row.depth + 1)),
        );

        self.store.insert_tree_rows(&rows).await?;

        tracing::debug!(
            team_id = %team_id,
            parent_id = %parent_id,
            rows = rows.len(),
            "Team registered in hierarchy"
        );
        Ok(rows)
    }

    async fn unregister(&self, rows: &[TeamTreeEntry]) -> Result<()> {
        self.store.rewrite_tree_rows(rows, &[]).await
    }

    /// Check that `parent` may become the parent of `team`
    pub async fn validate_team_parent_update(&self, team: &Team, parent: &Team) -> Result<()> {
        if parent.id == team.id {
            return Err(TeamServiceError::ParentIsSelf.into());
        }

        let descendants = self.descendant_ids(&team.id).await?;
        if descendants.contains(&parent.id) {
            return Err(TeamServiceError::ParentIsDescendant.into());
        }

        if self.get_root_team().await?.id == team.id {
            return Err(TeamServiceError::ParentOfRoot.into());
        }

        Ok(())
    }

    /// Move `team` and its whole subtree under `new_parent`
    pub async fn update_team_parent(&self, team: &Team, new_parent: &Team) -> Result<()> {
        let _guard = self.hierarchy_lock.lock().await;
        self.reparent(team, new_parent).await?;
        Ok(())
    }

    /// Returns the removed and inserted rows so the move can be undone
    async fn reparent(
        &self,
        team: &Team,
        new_parent: &Team,
    ) -> Result<(Vec<TeamTreeEntry>, Vec<TeamTreeEntry>)> {
        self.validate_team_parent_update(team, new_parent).await?;

        let subtree = self.store.tree_rows_for_parent(&team.id).await?;
        let subtree_ids: HashSet<Uuid> = subtree.iter().map(|row| row.child).collect();

        // Rows crossing from outside the subtree into it
        let mut detached = Vec::new();
        for child in &subtree_ids {
            detached.extend(
                self.store
                    .tree_rows_for_child(child)
                    .await?
                    .into_iter()
                    .filter(|row| !subtree_ids.contains(&row.parent)),
            );
        }

        let supertree = self.store.tree_rows_for_child(&new_parent.id).await?;
        let attached: Vec<TeamTreeEntry> = supertree
            .iter()
            .flat_map(|above| {
                subtree.iter().map(move |below| {
                    TeamTreeEntry::new(above.parent, below.child, above.depth + below.depth + 1)
                })
            })
            .collect();

        self.store.rewrite_tree_rows(&detached, &attached).await?;

        tracing::info!(
            team_id = %team.id,
            new_parent_id = %new_parent.id,
            subtree_size = subtree_ids.len(),
            removed = detached.len(),
            inserted = attached.len(),
            "Team moved in hierarchy"
        );
        Ok((detached, attached))
    }

    async fn descendant_ids(&self, parent: &Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .store
            .tree_rows_for_parent(parent)
            .await?
            .into_iter()
            .filter(|row| row.depth > 0)
            .map(|row| row.child)
            .collect())
    }

    /// All descendants of `parent`, nearest first
    pub async fn get_all_child_teams(&self, parent: &Team) -> Result<Vec<Team>> {
        let rows: Vec<TeamTreeEntry> = self
            .store
            .tree_rows_for_parent(&parent.id)
            .await?
            .into_iter()
            .filter(|row| row.depth > 0)
            .collect();
        self.teams_for_rows(&rows, |row| row.child, false).await
    }

    /// Direct children of `parent`, by name
    pub async fn get_immediate_child_teams(&self, parent: &Team) -> Result<Vec<Team>> {
        let ids: Vec<Uuid> = self
            .store
            .tree_rows_for_parent(&parent.id)
            .await?
            .into_iter()
            .filter(TeamTreeEntry::is_direct_relationship)
            .map(|row| row.child)
            .collect();

        let mut teams = self.store.get_teams(&ids).await?;
        teams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(teams)
    }

    /// All ancestors of `child`, most distant first
    pub async fn get_all_parent_teams(&self, child: &Team) -> Result<Vec<Team>> {
        let rows: Vec<TeamTreeEntry> = self
            .store
            .tree_rows_for_child(&child.id)
            .await?
            .into_iter()
            .filter(|row| row.depth > 0)
            .collect();
        self.teams_for_rows(&rows, |row| row.parent, true).await
    }

    async fn teams_for_rows(
        &self,
        rows: &[TeamTreeEntry],
        team_of: impl Fn(&TeamTreeEntry) -> Uuid,
        most_distant_first: bool,
    ) -> Result<Vec<Team>> {
        let depths: HashMap<Uuid, u32> = rows.iter().map(|row| (team_of(row), row.depth)).collect();
        let ids: Vec<Uuid> = depths.keys().copied().collect();

        let mut teams = self.store.get_teams(&ids).await?;
        teams.sort_by(|a, b| {
            let (da, db) = (depths[&a.id], depths[&b.id]);
            let by_depth = if most_distant_first { db.cmp(&da) } else { da.cmp(&db) };
            by_depth.then_with(|| a.name.cmp(&b.name))
        });
        Ok(teams)
    }

    /// The direct parent of `child`, or `None` for the root
    pub async fn get_immediate_parent_team(&self, child: &Team) -> Result<Option<Team>> {
        let parent_id = self
            .store
            .tree_rows_for_child(&child.id)
            .await?
            .into_iter()
            .find(TeamTreeEntry::is_direct_relationship)
            .map(|row| row.parent);

        match parent_id {
            Some(id) => self.store.get_team(&id).await,
            None => Ok(None),
        }
    }

    /// The single team without a parent
    pub async fn get_root_team(&self) -> Result<Team> {
        let with_parents: HashSet<Uuid> = self
            .store
            .tree_rows_deeper_than(0)
            .await?
            .into_iter()
            .map(|row| row.child)
            .collect();

        let mut roots: Vec<Team> = self
            .store
            .list_teams()
            .await?
            .into_iter()
            .filter(|team| !with_parents.contains(&team.id))
            .collect();

        if roots.len() != 1 {
            tracing::error!(count = roots.len(), "Team hierarchy has no single root");
            return Err(TeamServiceError::RootTeamCount(roots.len()).into());
        }
        Ok(roots.remove(0))
    }

    /// Entries for a team picker: the root, then every team with its parent.
    ///
    /// Teams that have sub-teams come first, then by parent name and team name.
    pub async fn get_team_select_data(&self) -> Result<Vec<TeamSelectDatum>> {
        let root = self.get_root_team().await?;
        let edges = self.store.tree_rows_at_depth(1).await?;

        let parents: HashSet<Uuid> = edges.iter().map(|row| row.parent).collect();
        let teams: HashMap<Uuid, Team> = self
            .store
            .list_teams()
            .await?
            .into_iter()
            .map(|team| (team.id, team))
            .collect();

        let mut entries = Vec::with_capacity(edges.len());
        for edge in &edges {
            let (Some(parent), Some(child)) = (teams.get(&edge.parent), teams.get(&edge.child)) else {
                return Err(AppError::Integrity(format!(
                    "Team tree row ({}, {}) refers to a missing team",
                    edge.parent, edge.child
                )));
            };
            entries.push((parents.contains(&child.id), parent, child));
        }
        entries.sort_by(|(a_has, a_parent, a_child), (b_has, b_parent, b_child)| {
            b_has
                .cmp(a_has)
                .then_with(|| a_parent.name.cmp(&b_parent.name))
                .then_with(|| a_child.name.cmp(&b_child.name))
        });

        let mut data = vec![TeamSelectDatum {
            team_id: root.id,
            team_name: root.name.clone(),
            parent_id: None,
            parent_name: None,
        }];
        data.extend(entries.into_iter().map(|(_, parent, child)| TeamSelectDatum {
            team_id: child.id,
            team_name: child.name.clone(),
            parent_id: Some(parent.id),
            parent_name: Some(parent.name.clone()),
        }));
        Ok(data)
    }

    /// Propose a unique slug for `team`, prefixing the parent's name on collision
    pub async fn generate_team_slug(&self, team: &Team) -> Result<String> {
        let parent = self.get_immediate_parent_team(team).await?;
        self.unique_slug(team, parent.as_ref()).await
    }

    /// Slug for `team` as if it sat under `parent`
    async fn unique_slug(&self, team: &Team, parent: Option<&Team>) -> Result<String> {
        let slug = slugify(&team.name);
        if !self.slug_taken(&slug, team).await? {
            return Ok(slug);
        }

        // A later rename of the parent is not reflected in the slug
        let parent = parent.ok_or(TeamServiceError::SlugNotUnique)?;
        let slug = slugify(&format!("{} {}", parent.name, team.name));
        if self.slug_taken(&slug, team).await? {
            return Err(TeamServiceError::SlugNotUnique.into());
        }
        Ok(slug)
    }

    async fn slug_taken(&self, slug: &str, team: &Team) -> Result<bool> {
        Ok(self
            .store
            .find_team_by_slug(slug)
            .await?
            .is_some_and(|other| other.id != team.id))
    }

    /// Whether a team can be deleted, and if not, what is in the way
    pub async fn can_team_be_deleted(&self, team: &Team) -> Result<(bool, Vec<String>)> {
        let mut reasons = Vec::new();

        if !self.descendant_ids(&team.id).await?.is_empty() {
            reasons.push("sub-teams".to_string());
        }
        if !self.get_team_members(team).await?.is_empty() {
            reasons.push("members".to_string());
        }

        Ok((reasons.is_empty(), reasons))
    }

    /// Active memberships of the team and all of its sub-teams
    pub async fn get_team_members(&self, team: &Team) -> Result<Vec<TeamMember>> {
        let mut team_ids = self.descendant_ids(&team.id).await?;
        team_ids.push(team.id);

        Ok(self
            .store
            .members_of_teams(&team_ids)
            .await?
            .into_iter()
            .filter(|member| member.is_active)
            .collect())
    }

    /// Share of the people in a team (sub-teams included) with a complete profile.
    ///
    /// `None` when the team has nobody in it.
    pub async fn profile_completion(&self, team: &Team) -> Result<Option<f64>> {
        if let Some(cached) = self.profile_completion_cache.get(&team.id).await {
            return Ok(Some(cached));
        }

        let person_ids: Vec<Uuid> = self
            .get_team_members(team)
            .await?
            .into_iter()
            .map(|member| member.person_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let people = self.store.get_people(&person_ids).await?;

        if people.is_empty() {
            return Ok(None);
        }

        let completed = people.iter().filter(|person| person.has_complete_profile()).count();
        let completion = completed as f64 / people.len() as f64;

        self.profile_completion_cache.insert(team.id, completion).await;
        Ok(Some(completion))
    }

    pub async fn clear_profile_completion_cache(&self, team_id: &Uuid) {
        self.profile_completion_cache.invalidate(team_id).await;
    }

    /// Create a team under `parent_id`, assign its slug and record the change
    pub async fn create_team(
        &self,
        draft: TeamDraft,
        parent_id: Uuid,
        actor: Option<String>,
    ) -> Result<Team> {
        let _guard = self.hierarchy_lock.lock().await;

        let parent = self.require_team(&parent_id).await?;
        let mut team = Team::new(draft.name);
        team.abbreviation = draft.abbreviation;
        team.description = draft.description;
        team.leaders_ordering = draft.leaders_ordering;

        team.slug = self.unique_slug(&team, Some(&parent)).await?;

        let rows = self.register(team.id, parent.id).await?;
        if let Err(e) = self.store.save_team(&team).await {
            self.unregister(&rows).await?;
            return Err(e);
        }

        self.team_created(&team, actor).await?;
        Ok(team)
    }

    /// Create the root of the hierarchy
    pub async fn create_root_team(&self, draft: TeamDraft, actor: Option<String>) -> Result<Team> {
        let _guard = self.hierarchy_lock.lock().await;

        if !self.store.list_teams().await?.is_empty() {
            return Err(TeamServiceError::RootExists.into());
        }

        let mut team = Team::new(draft.name);
        team.abbreviation = draft.abbreviation;
        team.description = draft.description;
        team.leaders_ordering = draft.leaders_ordering;
        team.slug = slugify(&team.name);

        let rows = self.register(team.id, team.id).await?;
        if let Err(e) = self.store.save_team(&team).await {
            self.unregister(&rows).await?;
            return Err(e);
        }

        self.team_created(&team, actor).await?;
        Ok(team)
    }

    /// Apply an edit form to a team, moving it if `parent_id` changed.
    ///
    /// Nothing is written unless the move, the slug and the save all succeed.
    pub async fn update_team(
        &self,
        team_id: &Uuid,
        draft: TeamDraft,
        parent_id: Option<Uuid>,
        actor: Option<String>,
    ) -> Result<Team> {
        let _guard = self.hierarchy_lock.lock().await;

        let mut team = self.require_team(team_id).await?;
        let renamed = team.name != draft.name;

        let current_parent = self.get_immediate_parent_team(&team).await?;
        let new_parent = match parent_id {
            Some(id) if current_parent.as_ref().map(|p| p.id) != Some(id) => {
                let parent = self.require_team(&id).await?;
                self.validate_team_parent_update(&team, &parent).await?;
                Some(parent)
            }
            _ => None,
        };

        team.name = draft.name;
        team.abbreviation = draft.abbreviation;
        team.description = draft.description;
        team.leaders_ordering = draft.leaders_ordering;

        if renamed {
            let parent = new_parent.as_ref().or(current_parent.as_ref());
            team.slug = self.unique_slug(&team, parent).await?;
        }
        team.touch();

        let moved = match &new_parent {
            Some(parent) => Some(self.reparent(&team, parent).await?),
            None => None,
        };
        if let Err(e) = self.store.save_team(&team).await {
            if let Some((detached, attached)) = moved {
                self.store.rewrite_tree_rows(&attached, &detached).await?;
            }
            return Err(e);
        }

        self.team_updated(&team, actor).await?;
        Ok(team)
    }

    /// Delete a team that has neither sub-teams nor members
    pub async fn delete_team(&self, team_id: &Uuid, actor: Option<String>) -> Result<()> {
        let _guard = self.hierarchy_lock.lock().await;

        let team = self.require_team(team_id).await?;
        let (deletable, reasons) = self.can_team_be_deleted(&team).await?;
        if !deletable {
            return Err(TeamServiceError::NotDeletable(reasons).into());
        }

        // Snapshot while the parent is still known
        let repr = self.audit_repr(&team).await?;
        self.store.delete_team(&team.id).await?;
        self.clear_profile_completion_cache(&team.id).await;

        self.store
            .append_audit_log(&AuditLog::new(
                AuditAction::Delete,
                actor,
                AUDIT_OBJECT_TYPE,
                team.id,
                repr,
            ))
            .await?;

        tracing::info!(team_id = %team.id, name = %team.name, "Team deleted");
        Ok(())
    }

    /// Add a person to a team
    pub async fn add_member(&self, member: &TeamMember) -> Result<()> {
        self.require_team(&member.team_id).await?;
        if self.store.get_person(&member.person_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Person {} not found", member.person_id)));
        }

        self.store.save_member(member).await?;
        self.clear_completion_up_the_tree(&member.team_id).await
    }

    /// Remove a membership
    pub async fn remove_member(&self, member: &TeamMember) -> Result<()> {
        self.store.delete_member(&member.id).await?;
        self.clear_completion_up_the_tree(&member.team_id).await
    }

    /// Save a person and drop cached completion figures for their teams
    pub async fn save_person(&self, person: &Person) -> Result<()> {
        self.store.save_person(person).await?;

        let team_ids: HashSet<Uuid> = self
            .store
            .members_of_person(&person.id)
            .await?
            .into_iter()
            .map(|member| member.team_id)
            .collect();
        for team_id in team_ids {
            self.clear_completion_up_the_tree(&team_id).await?;
        }
        Ok(())
    }

    async fn clear_completion_up_the_tree(&self, team_id: &Uuid) -> Result<()> {
        for row in self.store.tree_rows_for_child(team_id).await? {
            self.clear_profile_completion_cache(&row.parent).await;
        }
        Ok(())
    }

    async fn require_team(&self, id: &Uuid) -> Result<Team> {
        self.store
            .get_team(id)
            .await?
            .ok_or_else(|| TeamServiceError::TeamNotFound(*id).into())
    }

    pub async fn team_created(&self, team: &Team, actor: Option<String>) -> Result<()> {
        self.audit(AuditAction::Create, team, actor).await
    }

    pub async fn team_updated(&self, team: &Team, actor: Option<String>) -> Result<()> {
        self.audit(AuditAction::Update, team, actor).await
    }

    pub async fn team_deleted(&self, team: &Team, actor: Option<String>) -> Result<()> {
        self.audit(AuditAction::Delete, team, actor).await
    }

    async fn audit(&self, action: AuditAction, team: &Team, actor: Option<String>) -> Result<()> {
        let repr = self.audit_repr(team).await?;
        self.store
            .append_audit_log(&AuditLog::new(action, actor, AUDIT_OBJECT_TYPE, team.id, repr))
            .await?;

        tracing::info!(team_id = %team.id, action = %action, "Team audit entry written");
        Ok(())
    }

    /// Snapshot of a team for the audit trail, without timestamps
    async fn audit_repr(&self, team: &Team) -> Result<serde_json::Value> {
        let mut leaders_positions = Vec::new();
        if team.leaders_ordering == LeadersOrdering::Custom {
            let mut heads: Vec<TeamMember> = self
                .store
                .members_of_teams(&[team.id])
                .await?
                .into_iter()
                .filter(|member| member.head_of_team)
                .collect();
            heads.sort_by_key(|member| member.leaders_position);

            for head in heads {
                if let Some(person) = self.store.get_person(&head.person_id).await? {
                    let position = head.leaders_position.map(|p| p + 1).unwrap_or_default();
                    leaders_positions.push(format!("{}: {}", position, person.full_name()));
                }
            }
        }

        let mut repr = json!({
            "id": team.id,
            "name": team.name,
            "abbreviation": team.abbreviation,
            "slug": team.slug,
            "description": team.description,
            "leaders_ordering": team.leaders_ordering,
            "leaders_positions": leaders_positions,
        });
        if let Some(parent) = self.get_immediate_parent_team(team).await? {
            repr["parent"] = json!(parent.name);
        }
        Ok(repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppCache, InMemoryStore};
    use std::time::Duration;

    fn service() -> TeamService {
        TeamService::new(
            Arc::new(InMemoryStore::new()),
            AppCache::new(100, Duration::from_secs(3600)),
        )
    }

    fn draft(name: &str) -> TeamDraft {
        TeamDraft {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Directory store whose team saves can be made to fail
    #[derive(Default)]
    struct RefusingSaves {
        inner: InMemoryStore,
        refuse: std::sync::atomic::AtomicBool,
    }

    impl RefusingSaves {
        fn refuse_saves(&self) {
            self.refuse.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl DirectoryStore for RefusingSaves {
        async fn save_team(&self, team: &Team) -> Result<()> {
            if self.refuse.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(AppError::Database("disk full".to_string()));
            }
            self.inner.save_team(team).await
        }
        async fn get_team(&self, id: &Uuid) -> Result<Option<Team>> {
            self.inner.get_team(id).await
        }
        async fn get_teams(&self, ids: &[Uuid]) -> Result<Vec<Team>> {
            self.inner.get_teams(ids).await
        }
        async fn list_teams(&self) -> Result<Vec<Team>> {
            self.inner.list_teams().await
        }
        async fn find_team_by_slug(&self, slug: &str) -> Result<Option<Team>> {
            self.inner.find_team_by_slug(slug).await
        }
        async fn delete_team(&self, id: &Uuid) -> Result<()> {
            self.inner.delete_team(id).await
        }
        async fn tree_rows_for_child(&self, child: &Uuid) -> Result<Vec<TeamTreeEntry>> {
            self.inner.tree_rows_for_child(child).await
        }
        async fn tree_rows_for_parent(&self, parent: &Uuid) -> Result<Vec<TeamTreeEntry>> {
            self.inner.tree_rows_for_parent(parent).await
        }
        async fn tree_rows_at_depth(&self, depth: u32) -> Result<Vec<TeamTreeEntry>> {
            self.inner.tree_rows_at_depth(depth).await
        }
        async fn tree_rows_deeper_than(&self, depth: u32) -> Result<Vec<TeamTreeEntry>> {
            self.inner.tree_rows_deeper_than(depth).await
        }
        async fn insert_tree_rows(&self, rows: &[TeamTreeEntry]) -> Result<()> {
            self.inner.insert_tree_rows(rows).await
        }
        async fn rewrite_tree_rows(
            &self,
            remove: &[TeamTreeEntry],
            insert: &[TeamTreeEntry],
        ) -> Result<()> {
            self.inner.rewrite_tree_rows(remove, insert).await
        }
        async fn save_person(&self, person: &Person) -> Result<()> {
            self.inner.save_person(person).await
        }
        async fn get_person(&self, id: &Uuid) -> Result<Option<Person>> {
            self.inner.get_person(id).await
        }
        async fn get_people(&self, ids: &[Uuid]) -> Result<Vec<Person>> {
            self.inner.get_people(ids).await
        }
        async fn list_people(&self) -> Result<Vec<Person>> {
            self.inner.list_people().await
        }
        async fn save_member(&self, member: &TeamMember) -> Result<()> {
            self.inner.save_member(member).await
        }
        async fn delete_member(&self, id: &Uuid) -> Result<()> {
            self.inner.delete_member(id).await
        }
        async fn members_of_teams(&self, team_ids: &[Uuid]) -> Result<Vec<TeamMember>> {
            self.inner.members_of_teams(team_ids).await
        }
        async fn members_of_person(&self, person_id: &Uuid) -> Result<Vec<TeamMember>> {
            self.inner.members_of_person(person_id).await
        }
        async fn append_audit_log(&self, entry: &AuditLog) -> Result<()> {
            self.inner.append_audit_log(entry).await
        }
        async fn audit_log_for(&self, object_id: &Uuid) -> Result<Vec<AuditLog>> {
            self.inner.audit_log_for(object_id).await
        }
    }

    async fn all_rows(service: &TeamService) -> Vec<TeamTreeEntry> {
        let mut rows = service.store().tree_rows_at_depth(0).await.unwrap();
        rows.extend(service.store().tree_rows_deeper_than(0).await.unwrap());
        rows.sort_by_key(|row| (row.parent, row.child, row.depth));
        rows
    }

    #[tokio::test]
    async fn test_failed_save_removes_new_tree_rows() {
        let store = Arc::new(RefusingSaves::default());
        let service = TeamService::new(store.clone(), AppCache::new(100, Duration::from_secs(3600)));
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let before = all_rows(&service).await;

        store.refuse_saves();
        let err = service.create_team(draft("COO"), root.id, None).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));

        assert_eq!(all_rows(&service).await, before);
        assert_eq!(service.store().list_teams().await.unwrap().len(), 1);
        assert_eq!(service.store().tree_rows_for_parent(&root.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_undoes_move() {
        let store = Arc::new(RefusingSaves::default());
        let service = TeamService::new(store.clone(), AppCache::new(100, Duration::from_secs(3600)));
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();
        let gti = service.create_team(draft("GTI"), root.id, None).await.unwrap();
        let investment = service.create_team(draft("Investment"), gti.id, None).await.unwrap();
        let before = all_rows(&service).await;

        store.refuse_saves();
        assert!(service
            .update_team(&gti.id, draft("GTI"), Some(coo.id), None)
            .await
            .is_err());

        assert_eq!(all_rows(&service).await, before);
        let parents: Vec<Uuid> = service
            .get_all_parent_teams(&investment)
            .await
            .unwrap()
            .iter()
            .map(|team| team.id)
            .collect();
        assert_eq!(parents, vec![root.id, gti.id]);
    }

    #[tokio::test]
    async fn test_add_team_writes_self_and_ancestor_rows() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();
        let analysis = service.create_team(draft("Analysis"), coo.id, None).await.unwrap();

        let rows = service.store().tree_rows_for_child(&analysis.id).await.unwrap();
        assert_eq!(
            rows,
            vec![
                TeamTreeEntry::new(analysis.id, analysis.id, 0),
                TeamTreeEntry::new(coo.id, analysis.id, 1),
                TeamTreeEntry::new(root.id, analysis.id, 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_add_team_twice_is_rejected() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();

        let result = service.add_team(&root, &root).await;
        assert!(matches!(result, Err(AppError::Domain(_))));
    }

    #[tokio::test]
    async fn test_root_cannot_be_moved() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let stray = Team::new("Test");

        let err = service.update_team_parent(&root, &stray).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot update the parent of the root team");
    }

    #[tokio::test]
    async fn test_root_team_requires_single_root() {
        let service = service();
        assert!(matches!(
            service.get_root_team().await,
            Err(AppError::Integrity(_))
        ));

        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let err = service.create_root_team(draft("Other"), None).await.unwrap_err();
        assert_eq!(err.to_string(), "The hierarchy already has a root team");
        assert_eq!(service.store().list_teams().await.unwrap().len(), 1);
        assert_eq!(service.get_root_team().await.unwrap().id, root.id);
    }

    #[tokio::test]
    async fn test_second_root_cannot_be_registered() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let stray = Team::new("Other");

        let err = service.add_team(&stray, &stray).await.unwrap_err();
        assert_eq!(err.to_string(), "The hierarchy already has a root team");
        assert!(service.store().tree_rows_for_child(&stray.id).await.unwrap().is_empty());
        assert_eq!(service.get_root_team().await.unwrap().id, root.id);
    }

    #[tokio::test]
    async fn test_failed_edit_leaves_team_in_place() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();
        let gti = service.create_team(draft("GTI"), root.id, None).await.unwrap();
        service.create_team(draft("Investment"), gti.id, None).await.unwrap();
        service.create_team(draft("DIT Investment"), coo.id, None).await.unwrap();
        let change = service.create_team(draft("Change"), coo.id, None).await.unwrap();
        let before = service.store().tree_rows_for_child(&change.id).await.unwrap();

        let err = service
            .update_team(&change.id, draft("Investment"), Some(root.id), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot generate unique team slug");

        let parent = service.get_immediate_parent_team(&change).await.unwrap();
        assert_eq!(parent.map(|team| team.id), Some(coo.id));
        assert_eq!(service.store().tree_rows_for_child(&change.id).await.unwrap(), before);
        let stored = service.store().get_team(&change.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Change");
        assert_eq!(stored.slug, "change");
    }

    #[tokio::test]
    async fn test_generate_team_slug_prefixes_parent_on_collision() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();
        let gti = service.create_team(draft("GTI"), root.id, None).await.unwrap();
        let investment = service.create_team(draft("Investment"), gti.id, None).await.unwrap();

        let other = Team::new("Investment");
        service.add_team(&other, &coo).await.unwrap();

        assert_eq!(service.generate_team_slug(&investment).await.unwrap(), "investment");
        assert_eq!(service.generate_team_slug(&other).await.unwrap(), "coo-investment");
        assert!(matches!(
            service.generate_team_slug(&Team::new("COO")).await,
            Err(AppError::Domain(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_and_move_uses_new_parent_for_slug() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();
        let gti = service.create_team(draft("GTI"), root.id, None).await.unwrap();
        service.create_team(draft("Investment"), coo.id, None).await.unwrap();
        let change = service.create_team(draft("Change"), coo.id, None).await.unwrap();

        let moved = service
            .update_team(&change.id, draft("Investment"), Some(gti.id), None)
            .await
            .unwrap();

        assert_eq!(moved.slug, "gti-investment");
        let parent = service.get_immediate_parent_team(&moved).await.unwrap();
        assert_eq!(parent.map(|team| team.id), Some(gti.id));
    }

    #[tokio::test]
    async fn test_create_team_writes_audit_entry() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service
            .create_team(draft("COO"), root.id, Some("jane".to_string()))
            .await
            .unwrap();

        let log = service.store().audit_log_for(&coo.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::Create);
        assert_eq!(log[0].actor.as_deref(), Some("jane"));
        assert_eq!(log[0].object_repr["parent"], "DIT");
        assert_eq!(log[0].object_repr["slug"], "coo");
    }

    #[tokio::test]
    async fn test_delete_team_checks_members_and_sub_teams() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();

        let (deletable, reasons) = service.can_team_be_deleted(&root).await.unwrap();
        assert!(!deletable);
        assert_eq!(reasons, vec!["sub-teams".to_string()]);

        let person = Person::new("Jane", "Smith", "jane.smith@example.gov.uk");
        service.save_person(&person).await.unwrap();
        service
            .add_member(&TeamMember::new(person.id, coo.id, "Analyst"))
            .await
            .unwrap();

        let (_, reasons) = service.can_team_be_deleted(&root).await.unwrap();
        assert_eq!(reasons, vec!["sub-teams".to_string(), "members".to_string()]);

        let err = service.delete_team(&coo.id, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Team cannot be deleted because it has members");
    }

    #[tokio::test]
    async fn test_delete_leaf_team() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();

        service.delete_team(&coo.id, None).await.unwrap();

        assert!(service.get_all_child_teams(&root).await.unwrap().is_empty());
        let log = service.store().audit_log_for(&coo.id).await.unwrap();
        assert_eq!(log.last().unwrap().action, AuditAction::Delete);
    }

    #[tokio::test]
    async fn test_profile_completion() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), root.id, None).await.unwrap();

        assert_eq!(service.profile_completion(&root).await.unwrap(), None);

        let complete = Person::new("Jane", "Smith", "jane@example.gov.uk").with_profile_completion(100);
        let partial = Person::new("John", "Doe", "john@example.gov.uk").with_profile_completion(40);
        service.save_person(&complete).await.unwrap();
        service.save_person(&partial).await.unwrap();
        service
            .add_member(&TeamMember::new(complete.id, root.id, "Director"))
            .await
            .unwrap();
        service
            .add_member(&TeamMember::new(partial.id, coo.id, "Analyst"))
            .await
            .unwrap();
        // A second role for the same person does not count twice
        service
            .add_member(&TeamMember::new(partial.id, root.id, "Adviser"))
            .await
            .unwrap();

        assert_eq!(service.profile_completion(&root).await.unwrap(), Some(0.5));
        assert_eq!(service.profile_completion(&coo).await.unwrap(), Some(0.0));

        let partial = partial.with_profile_completion(100);
        service.save_person(&partial).await.unwrap();
        assert_eq!(service.profile_completion(&root).await.unwrap(), Some(1.0));
    }

    #[tokio::test]
    async fn test_custom_leaders_in_audit_repr() {
        let service = service();
        let root = service.create_root_team(draft("DIT"), None).await.unwrap();
        let person = Person::new("Jane", "Smith", "jane@example.gov.uk");
        service.save_person(&person).await.unwrap();
        service
            .add_member(&TeamMember::new(person.id, root.id, "Director").as_head_of_team(Some(0)))
            .await
            .unwrap();

        let updated = service
            .update_team(
                &root.id,
                TeamDraft {
                    name: "DIT".to_string(),
                    leaders_ordering: LeadersOrdering::Custom,
                    ..Default::default()
                },
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.slug, "dit");
        let log = service.store().audit_log_for(&root.id).await.unwrap();
        assert_eq!(log[1].action, AuditAction::Update);
        assert_eq!(log[1].object_repr["leaders_positions"][0], "1: Jane Smith");
    }
}
