use crate::error::{AppError, Result};
use crate::models::{
    AuditLog, ContentRef, CurationLookup, LookupKind, Page, Person, SearchKeywordOrPhrase, Team,
    TeamMember, TeamTreeEntry,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Storage for teams, the team closure table, people, memberships and the audit trail
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Insert or replace a team
    async fn save_team(&self, team: &Team) -> Result<()>;

    /// Get a team by ID
    async fn get_team(&self, id: &Uuid) -> Result<Option<Team>>;

    /// Get every team whose ID is in `ids` (missing IDs are skipped)
    async fn get_teams(&self, ids: &[Uuid]) -> Result<Vec<Team>>;

    /// List all teams
    async fn list_teams(&self) -> Result<Vec<Team>>;

    /// Find a team by its slug
    async fn find_team_by_slug(&self, slug: &str) -> Result<Option<Team>>;

    /// Delete a team together with every closure row that mentions it
    async fn delete_team(&self, id: &Uuid) -> Result<()>;

    /// Closure rows whose child is the given team
    async fn tree_rows_for_child(&self, child: &Uuid) -> Result<Vec<TeamTreeEntry>>;

    /// Closure rows whose parent is the given team
    async fn tree_rows_for_parent(&self, parent: &Uuid) -> Result<Vec<TeamTreeEntry>>;

    /// Closure rows at an exact depth
    async fn tree_rows_at_depth(&self, depth: u32) -> Result<Vec<TeamTreeEntry>>;

    /// Closure rows deeper than `depth`
    async fn tree_rows_deeper_than(&self, depth: u32) -> Result<Vec<TeamTreeEntry>>;

    /// Insert closure rows; fails if any (parent, child) pair already exists
    async fn insert_tree_rows(&self, rows: &[TeamTreeEntry]) -> Result<()>;

    /// Atomically remove and insert closure rows.
    ///
    /// Readers never observe the state between the removal and the insertion.
    async fn rewrite_tree_rows(
        &self,
        remove: &[TeamTreeEntry],
        insert: &[TeamTreeEntry],
    ) -> Result<()>;

    /// Insert or replace a person
    async fn save_person(&self, person: &Person) -> Result<()>;

    /// Get a person by ID
    async fn get_person(&self, id: &Uuid) -> Result<Option<Person>>;

    /// Get every person whose ID is in `ids`
    async fn get_people(&self, ids: &[Uuid]) -> Result<Vec<Person>>;

    /// List all people, active or not
    async fn list_people(&self) -> Result<Vec<Person>>;

    /// Insert or replace a membership; enforces (person, team, job title, head of team) uniqueness
    async fn save_member(&self, member: &TeamMember) -> Result<()>;

    /// Delete a membership
    async fn delete_member(&self, id: &Uuid) -> Result<()>;

    /// Memberships (active or not) in any of the given teams
    async fn members_of_teams(&self, team_ids: &[Uuid]) -> Result<Vec<TeamMember>>;

    /// Memberships held by a person
    async fn members_of_person(&self, person_id: &Uuid) -> Result<Vec<TeamMember>>;

    /// Append an audit trail entry
    async fn append_audit_log(&self, entry: &AuditLog) -> Result<()>;

    /// Audit trail for an object, oldest first
    async fn audit_log_for(&self, object_id: &Uuid) -> Result<Vec<AuditLog>>;
}

/// Storage for pin/exclude curation
#[async_trait]
pub trait CurationStore: Send + Sync {
    /// Find a keyword or phrase by its normalised text
    async fn find_keyword(&self, keyword_or_phrase: &str) -> Result<Option<SearchKeywordOrPhrase>>;

    /// Insert a keyword or phrase
    async fn save_keyword(&self, keyword: &SearchKeywordOrPhrase) -> Result<()>;

    /// List all keywords and phrases
    async fn list_keywords(&self) -> Result<Vec<SearchKeywordOrPhrase>>;

    /// Delete keywords and phrases by ID
    async fn delete_keywords(&self, ids: &[Uuid]) -> Result<()>;

    /// Insert a lookup row
    async fn save_lookup(&self, lookup: &CurationLookup) -> Result<()>;

    /// All lookups of one kind
    async fn list_lookups(&self, kind: LookupKind) -> Result<Vec<CurationLookup>>;

    /// Delete all lookups of one kind for an object, returning how many were removed
    async fn delete_lookups_for(&self, kind: LookupKind, target: &ContentRef) -> Result<usize>;
}

/// Runtime overrides for search settings (highest priority layer)
#[async_trait]
pub trait SettingStore: Send + Sync {
    /// All stored settings as (flat key, value) pairs
    async fn list_settings(&self) -> Result<Vec<(String, String)>>;

    /// Insert or replace a setting
    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a setting
    async fn delete_setting(&self, key: &str) -> Result<()>;
}

/// Storage for published content
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn save_page(&self, page: &Page) -> Result<()>;
    async fn get_page(&self, id: &Uuid) -> Result<Option<Page>>;
    async fn list_pages(&self) -> Result<Vec<Page>>;
}

/// In-memory store (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    teams: Arc<DashMap<Uuid, Team>>,
    tree: Arc<RwLock<HashMap<(Uuid, Uuid), u32>>>,
    people: Arc<DashMap<Uuid, Person>>,
    members: Arc<DashMap<Uuid, TeamMember>>,
    audit_log: Arc<RwLock<Vec<AuditLog>>>,
    keywords: Arc<DashMap<Uuid, SearchKeywordOrPhrase>>,
    lookups: Arc<DashMap<Uuid, CurationLookup>>,
    settings: Arc<RwLock<BTreeMap<String, String>>>,
    pages: Arc<DashMap<Uuid, Page>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows_matching(&self, predicate: impl Fn(&(Uuid, Uuid), u32) -> bool) -> Vec<TeamTreeEntry> {
        let mut rows: Vec<TeamTreeEntry> = self
            .tree
            .read()
            .iter()
            .filter(|(key, depth)| predicate(key, **depth))
            .map(|(&(parent, child), &depth)| TeamTreeEntry::new(parent, child, depth))
            .collect();
        rows.sort_by_key(|row| (row.depth, row.parent, row.child));
        rows
    }
}

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn save_team(&self, team: &Team) -> Result<()> {
        if let Some(existing) = self
            .teams
            .iter()
            .find(|entry| entry.slug == team.slug && entry.id != team.id)
        {
            return Err(AppError::Validation(format!(
                "Team slug '{}' is already used by team {}",
                team.slug,
                existing.id
            )));
        }

        self.teams.insert(team.id, team.clone());
        tracing::debug!(team_id = %team.id, "Team saved");
        Ok(())
    }

    async fn get_team(&self, id: &Uuid) -> Result<Option<Team>> {
        Ok(self.teams.get(id).map(|entry| entry.clone()))
    }

    async fn get_teams(&self, ids: &[Uuid]) -> Result<Vec<Team>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.teams.get(id).map(|entry| entry.clone()))
            .collect())
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        let mut teams: Vec<Team> = self.teams.iter().map(|entry| entry.value().clone()).collect();
        teams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(teams)
    }

    async fn find_team_by_slug(&self, slug: &str) -> Result<Option<Team>> {
        Ok(self
            .teams
            .iter()
            .find(|entry| entry.slug == slug)
            .map(|entry| entry.value().clone()))
    }

    async fn delete_team(&self, id: &Uuid) -> Result<()> {
        if self.teams.remove(id).is_none() {
            return Err(AppError::NotFound(format!("Team {} not found", id)));
        }

        self.tree
            .write()
            .retain(|(parent, child), _| parent != id && child != id);

        tracing::debug!(team_id = %id, "Team deleted");
        Ok(())
    }

    async fn tree_rows_for_child(&self, child: &Uuid) -> Result<Vec<TeamTreeEntry>> {
        Ok(self.rows_matching(|(_, c), _| c == child))
    }

    async fn tree_rows_for_parent(&self, parent: &Uuid) -> Result<Vec<TeamTreeEntry>> {
        Ok(self.rows_matching(|(p, _), _| p == parent))
    }

    async fn tree_rows_at_depth(&self, depth: u32) -> Result<Vec<TeamTreeEntry>> {
        Ok(self.rows_matching(|_, d| d == depth))
    }

    async fn tree_rows_deeper_than(&self, depth: u32) -> Result<Vec<TeamTreeEntry>> {
        Ok(self.rows_matching(|_, d| d > depth))
    }

    async fn insert_tree_rows(&self, rows: &[TeamTreeEntry]) -> Result<()> {
        let mut tree = self.tree.write();

        if let Some(row) = rows
            .iter()
            .find(|row| tree.contains_key(&(row.parent, row.child)))
        {
            return Err(AppError::Integrity(format!(
                "Team tree row ({}, {}) already exists",
                row.parent, row.child
            )));
        }

        for row in rows {
            tree.insert((row.parent, row.child), row.depth);
        }
        Ok(())
    }

    async fn rewrite_tree_rows(
        &self,
        remove: &[TeamTreeEntry],
        insert: &[TeamTreeEntry],
    ) -> Result<()> {
        let mut tree = self.tree.write();

        for row in remove {
            tree.remove(&(row.parent, row.child));
        }
        for row in insert {
            tree.insert((row.parent, row.child), row.depth);
        }

        tracing::debug!(
            removed = remove.len(),
            inserted = insert.len(),
            "Team tree rows rewritten"
        );
        Ok(())
    }

    async fn save_person(&self, person: &Person) -> Result<()> {
        self.people.insert(person.id, person.clone());
        Ok(())
    }

    async fn get_person(&self, id: &Uuid) -> Result<Option<Person>> {
        Ok(self.people.get(id).map(|entry| entry.clone()))
    }

    async fn get_people(&self, ids: &[Uuid]) -> Result<Vec<Person>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.people.get(id).map(|entry| entry.clone()))
            .collect())
    }

    async fn list_people(&self) -> Result<Vec<Person>> {
        let mut people: Vec<Person> = self.people.iter().map(|entry| entry.value().clone()).collect();
        people.sort_by_key(|person| (person.last_name.clone(), person.first_name.clone()));
        Ok(people)
    }

    async fn save_member(&self, member: &TeamMember) -> Result<()> {
        if self
            .members
            .iter()
            .any(|entry| entry.value().conflicts_with(member))
        {
            return Err(AppError::Validation(format!(
                "Person {} already holds '{}' in team {}",
                member.person_id, member.job_title, member.team_id
            )));
        }

        self.members.insert(member.id, member.clone());
        Ok(())
    }

    async fn delete_member(&self, id: &Uuid) -> Result<()> {
        self.members
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Team member {} not found", id)))
    }

    async fn members_of_teams(&self, team_ids: &[Uuid]) -> Result<Vec<TeamMember>> {
        Ok(self
            .members
            .iter()
            .filter(|entry| team_ids.contains(&entry.team_id))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn members_of_person(&self, person_id: &Uuid) -> Result<Vec<TeamMember>> {
        Ok(self
            .members
            .iter()
            .filter(|entry| entry.person_id == *person_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn append_audit_log(&self, entry: &AuditLog) -> Result<()> {
        self.audit_log.write().push(entry.clone());
        Ok(())
    }

    async fn audit_log_for(&self, object_id: &Uuid) -> Result<Vec<AuditLog>> {
        Ok(self
            .audit_log
            .read()
            .iter()
            .filter(|entry| entry.object_id == *object_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CurationStore for InMemoryStore {
    async fn find_keyword(&self, keyword_or_phrase: &str) -> Result<Option<SearchKeywordOrPhrase>> {
        Ok(self
            .keywords
            .iter()
            .find(|entry| entry.keyword_or_phrase == keyword_or_phrase)
            .map(|entry| entry.value().clone()))
    }

    async fn save_keyword(&self, keyword: &SearchKeywordOrPhrase) -> Result<()> {
        self.keywords.insert(keyword.id, keyword.clone());
        Ok(())
    }

    async fn list_keywords(&self) -> Result<Vec<SearchKeywordOrPhrase>> {
        let mut keywords: Vec<_> = self.keywords.iter().map(|entry| entry.value().clone()).collect();
        keywords.sort_by(|a, b| a.keyword_or_phrase.cmp(&b.keyword_or_phrase));
        Ok(keywords)
    }

    async fn delete_keywords(&self, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            self.keywords.remove(id);
        }
        Ok(())
    }

    async fn save_lookup(&self, lookup: &CurationLookup) -> Result<()> {
        self.lookups.insert(lookup.id, lookup.clone());
        Ok(())
    }

    async fn list_lookups(&self, kind: LookupKind) -> Result<Vec<CurationLookup>> {
        Ok(self
            .lookups
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_lookups_for(&self, kind: LookupKind, target: &ContentRef) -> Result<usize> {
        let before = self.lookups.len();
        self.lookups
            .retain(|_, lookup| !(lookup.kind == kind && lookup.target == *target));
        Ok(before - self.lookups.len())
    }
}

#[async_trait]
impl SettingStore for InMemoryStore {
    async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .settings
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.settings.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        self.settings.write().remove(key);
        Ok(())
    }
}

#[async_trait]
impl PageStore for InMemoryStore {
    async fn save_page(&self, page: &Page) -> Result<()> {
        self.pages.insert(page.id, page.clone());
        Ok(())
    }

    async fn get_page(&self, id: &Uuid) -> Result<Option<Page>> {
        Ok(self.pages.get(id).map(|entry| entry.clone()))
    }

    async fn list_pages(&self) -> Result<Vec<Page>> {
        let mut pages: Vec<Page> = self.pages.iter().map(|entry| entry.value().clone()).collect();
        pages.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(pages)
    }
}
