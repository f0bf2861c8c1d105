use crate::error::{AppError, Result};
use crate::models::{
    AuditLog, ContentRef, CurationLookup, LookupKind, Page, Person, SearchKeywordOrPhrase, Team,
    TeamMember, TeamTreeEntry,
};
use crate::state::{CurationStore, DirectoryStore, PageStore, SettingStore};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, Transactional};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Persistent store using the Sled embedded database
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    teams_tree: sled::Tree,
    team_slugs_tree: sled::Tree,
    team_tree_tree: sled::Tree,
    people_tree: sled::Tree,
    members_tree: sled::Tree,
    audit_tree: sled::Tree,
    keywords_tree: sled::Tree,
    lookups_tree: sled::Tree,
    settings_tree: sled::Tree,
    pages_tree: sled::Tree,
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            AppError::Database(format!("Failed to open Sled database: {}", e))
        })?;

        let open = |name: &str| {
            db.open_tree(name).map_err(|e| {
                AppError::Database(format!("Failed to open {} tree: {}", name, e))
            })
        };

        let store = Self {
            teams_tree: open("teams")?,
            team_slugs_tree: open("team_slugs")?,
            team_tree_tree: open("team_tree")?,
            people_tree: open("people")?,
            members_tree: open("team_members")?,
            audit_tree: open("audit_log")?,
            keywords_tree: open("search_keywords")?,
            lookups_tree: open("curation_lookups")?,
            settings_tree: open("search_settings")?,
            pages_tree: open("pages")?,
            db: Arc::new(db),
        };

        tracing::info!("Initialized Sled store at {:?}", path.as_ref());
        Ok(store)
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value)
            .map_err(|e| AppError::Serialization(format!("Failed to serialize record: {}", e)))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| AppError::Serialization(format!("Failed to deserialize record: {}", e)))
    }

    fn decode_in_tx<T: DeserializeOwned>(bytes: &[u8]) -> ConflictableTransactionResult<T, AppError> {
        Self::decode(bytes).map_err(ConflictableTransactionError::Abort)
    }

    fn transaction_error(e: TransactionError<AppError>) -> AppError {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => AppError::Database(e.to_string()),
        }
    }

    /// Closure rows are keyed by parent id followed by child id
    fn tree_key(parent: &Uuid, child: &Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(parent.as_bytes());
        key.extend_from_slice(child.as_bytes());
        key
    }

    fn tree_entry(key: &[u8], value: &[u8]) -> Result<TeamTreeEntry> {
        if key.len() != 32 {
            return Err(AppError::Integrity(format!(
                "Malformed team tree key of {} bytes",
                key.len()
            )));
        }
        let parent = Uuid::from_slice(&key[..16])
            .map_err(|e| AppError::Integrity(format!("Malformed team tree key: {}", e)))?;
        let child = Uuid::from_slice(&key[16..])
            .map_err(|e| AppError::Integrity(format!("Malformed team tree key: {}", e)))?;
        let depth: u32 = Self::decode(value)?;
        Ok(TeamTreeEntry::new(parent, child, depth))
    }

    fn get_record<T: DeserializeOwned>(tree: &sled::Tree, id: &Uuid) -> Result<Option<T>> {
        tree.get(id.as_bytes())?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>> {
        tree.iter()
            .values()
            .map(|value| Self::decode(&value?))
            .collect()
    }

    fn scan_tree_rows(
        &self,
        predicate: impl Fn(&TeamTreeEntry) -> bool,
    ) -> Result<Vec<TeamTreeEntry>> {
        let mut rows = Vec::new();
        for item in self.team_tree_tree.iter() {
            let (key, value) = item?;
            let row = Self::tree_entry(&key, &value)?;
            if predicate(&row) {
                rows.push(row);
            }
        }
        rows.sort_by_key(|row| (row.depth, row.parent, row.child));
        Ok(rows)
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| {
            AppError::Database(format!("Failed to flush Sled database: {}", e))
        })?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for SledStore {
    async fn save_team(&self, team: &Team) -> Result<()> {
        let encoded = Self::encode(team)?;
        let id = &team.id.as_bytes()[..];
        let slug = team.slug.as_bytes();

        // The slug index and the team record change together
        (&self.teams_tree, &self.team_slugs_tree)
            .transaction(|(teams, slugs)| -> ConflictableTransactionResult<(), AppError> {
                if let Some(owner) = slugs.get(slug)? {
                    if &owner[..] != id {
                        let owner = Uuid::from_slice(&owner).unwrap_or_default();
                        return sled::transaction::abort(AppError::Validation(format!(
                            "Team slug '{}' is already used by team {}",
                            team.slug, owner
                        )));
                    }
                }
                if let Some(previous) = teams.get(id)? {
                    let previous: Team = Self::decode_in_tx(&previous)?;
                    if previous.slug != team.slug {
                        slugs.remove(previous.slug.as_bytes())?;
                    }
                }
                slugs.insert(slug, id)?;
                teams.insert(id, encoded.as_slice())?;
                Ok(())
            })
            .map_err(Self::transaction_error)?;
        self.flush().await?;

        tracing::debug!(team_id = %team.id, "Team saved to Sled");
        Ok(())
    }

    async fn get_team(&self, id: &Uuid) -> Result<Option<Team>> {
        Self::get_record(&self.teams_tree, id)
    }

    async fn get_teams(&self, ids: &[Uuid]) -> Result<Vec<Team>> {
        let mut teams = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(team) = Self::get_record(&self.teams_tree, id)? {
                teams.push(team);
            }
        }
        Ok(teams)
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        let mut teams: Vec<Team> = Self::scan(&self.teams_tree)?;
        teams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(teams)
    }

    async fn find_team_by_slug(&self, slug: &str) -> Result<Option<Team>> {
        match self.team_slugs_tree.get(slug.as_bytes())? {
            Some(owner) => {
                let owner = Uuid::from_slice(&owner)
                    .map_err(|e| AppError::Integrity(format!("Malformed team slug entry: {}", e)))?;
                Self::get_record(&self.teams_tree, &owner)
            }
            None => Ok(None),
        }
    }

    async fn delete_team(&self, id: &Uuid) -> Result<()> {
        let stale: Vec<Vec<u8>> = self
            .scan_tree_rows(|row| row.parent == *id || row.child == *id)?
            .iter()
            .map(|row| Self::tree_key(&row.parent, &row.child))
            .collect();

        (&self.teams_tree, &self.team_slugs_tree, &self.team_tree_tree)
            .transaction(|(teams, slugs, rows)| -> ConflictableTransactionResult<(), AppError> {
                let Some(previous) = teams.remove(&id.as_bytes()[..])? else {
                    return sled::transaction::abort(AppError::NotFound(format!(
                        "Team {} not found",
                        id
                    )));
                };
                let previous: Team = Self::decode_in_tx(&previous)?;
                slugs.remove(previous.slug.as_bytes())?;
                for key in &stale {
                    rows.remove(key.as_slice())?;
                }
                Ok(())
            })
            .map_err(Self::transaction_error)?;
        self.flush().await?;

        tracing::debug!(team_id = %id, "Team deleted from Sled");
        Ok(())
    }

    async fn tree_rows_for_child(&self, child: &Uuid) -> Result<Vec<TeamTreeEntry>> {
        self.scan_tree_rows(|row| row.child == *child)
    }

    async fn tree_rows_for_parent(&self, parent: &Uuid) -> Result<Vec<TeamTreeEntry>> {
        // Keys start with the parent id, so a prefix scan is enough
        let mut rows = Vec::new();
        for item in self.team_tree_tree.scan_prefix(parent.as_bytes()) {
            let (key, value) = item?;
            rows.push(Self::tree_entry(&key, &value)?);
        }
        rows.sort_by_key(|row| (row.depth, row.child));
        Ok(rows)
    }

    async fn tree_rows_at_depth(&self, depth: u32) -> Result<Vec<TeamTreeEntry>> {
        self.scan_tree_rows(|row| row.depth == depth)
    }

    async fn tree_rows_deeper_than(&self, depth: u32) -> Result<Vec<TeamTreeEntry>> {
        self.scan_tree_rows(|row| row.depth > depth)
    }

    async fn insert_tree_rows(&self, rows: &[TeamTreeEntry]) -> Result<()> {
        let encoded = rows
            .iter()
            .map(|row| Ok((Self::tree_key(&row.parent, &row.child), Self::encode(&row.depth)?)))
            .collect::<Result<Vec<_>>>()?;

        self.team_tree_tree
            .transaction(|tx| -> ConflictableTransactionResult<(), String> {
                for (key, value) in &encoded {
                    if tx.get(key.as_slice())?.is_some() {
                        return sled::transaction::abort("Team tree row already exists".to_string());
                    }
                    tx.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<String>| match e {
                TransactionError::Abort(message) => AppError::Integrity(message),
                TransactionError::Storage(e) => AppError::Database(e.to_string()),
            })?;

        self.flush().await
    }

    async fn rewrite_tree_rows(
        &self,
        remove: &[TeamTreeEntry],
        insert: &[TeamTreeEntry],
    ) -> Result<()> {
        let removed: Vec<Vec<u8>> = remove
            .iter()
            .map(|row| Self::tree_key(&row.parent, &row.child))
            .collect();
        let inserted = insert
            .iter()
            .map(|row| Ok((Self::tree_key(&row.parent, &row.child), Self::encode(&row.depth)?)))
            .collect::<Result<Vec<_>>>()?;

        self.team_tree_tree
            .transaction(|tx| -> ConflictableTransactionResult<(), ()> {
                for key in &removed {
                    tx.remove(key.as_slice())?;
                }
                for (key, value) in &inserted {
                    tx.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<()>| {
                AppError::Database(format!("Team tree rewrite failed: {:?}", e))
            })?;

        tracing::debug!(
            removed = remove.len(),
            inserted = insert.len(),
            "Team tree rows rewritten in Sled"
        );
        self.flush().await
    }

    async fn save_person(&self, person: &Person) -> Result<()> {
        self.people_tree
            .insert(person.id.as_bytes(), Self::encode(person)?)?;
        self.flush().await
    }

    async fn get_person(&self, id: &Uuid) -> Result<Option<Person>> {
        Self::get_record(&self.people_tree, id)
    }

    async fn get_people(&self, ids: &[Uuid]) -> Result<Vec<Person>> {
        let mut people = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(person) = Self::get_record(&self.people_tree, id)? {
                people.push(person);
            }
        }
        Ok(people)
    }

    async fn list_people(&self) -> Result<Vec<Person>> {
        let mut people: Vec<Person> = Self::scan(&self.people_tree)?;
        people.sort_by_key(|person| (person.last_name.clone(), person.first_name.clone()));
        Ok(people)
    }

    async fn save_member(&self, member: &TeamMember) -> Result<()> {
        let members: Vec<TeamMember> = Self::scan(&self.members_tree)?;
        if members.iter().any(|existing| existing.conflicts_with(member)) {
            return Err(AppError::Validation(format!(
                "Person {} already holds '{}' in team {}",
                member.person_id, member.job_title, member.team_id
            )));
        }

        self.members_tree
            .insert(member.id.as_bytes(), Self::encode(member)?)?;
        self.flush().await
    }

    async fn delete_member(&self, id: &Uuid) -> Result<()> {
        if self.members_tree.remove(id.as_bytes())?.is_none() {
            return Err(AppError::NotFound(format!("Team member {} not found", id)));
        }
        self.flush().await
    }

    async fn members_of_teams(&self, team_ids: &[Uuid]) -> Result<Vec<TeamMember>> {
        Ok(Self::scan::<TeamMember>(&self.members_tree)?
            .into_iter()
            .filter(|member| team_ids.contains(&member.team_id))
            .collect())
    }

    async fn members_of_person(&self, person_id: &Uuid) -> Result<Vec<TeamMember>> {
        Ok(Self::scan::<TeamMember>(&self.members_tree)?
            .into_iter()
            .filter(|member| member.person_id == *person_id)
            .collect())
    }

    async fn append_audit_log(&self, entry: &AuditLog) -> Result<()> {
        // Sled ids are monotonic, which keeps the trail in insertion order
        let sequence = self.db.generate_id()?;
        self.audit_tree
            .insert(sequence.to_be_bytes(), Self::encode(entry)?)?;
        self.flush().await
    }

    async fn audit_log_for(&self, object_id: &Uuid) -> Result<Vec<AuditLog>> {
        Ok(Self::scan::<AuditLog>(&self.audit_tree)?
            .into_iter()
            .filter(|entry| entry.object_id == *object_id)
            .collect())
    }
}

#[async_trait]
impl CurationStore for SledStore {
    async fn find_keyword(&self, keyword_or_phrase: &str) -> Result<Option<SearchKeywordOrPhrase>> {
        Ok(Self::scan::<SearchKeywordOrPhrase>(&self.keywords_tree)?
            .into_iter()
            .find(|keyword| keyword.keyword_or_phrase == keyword_or_phrase))
    }

    async fn save_keyword(&self, keyword: &SearchKeywordOrPhrase) -> Result<()> {
        self.keywords_tree
            .insert(keyword.id.as_bytes(), Self::encode(keyword)?)?;
        self.flush().await
    }

    async fn list_keywords(&self) -> Result<Vec<SearchKeywordOrPhrase>> {
        let mut keywords: Vec<SearchKeywordOrPhrase> = Self::scan(&self.keywords_tree)?;
        keywords.sort_by(|a, b| a.keyword_or_phrase.cmp(&b.keyword_or_phrase));
        Ok(keywords)
    }

    async fn delete_keywords(&self, ids: &[Uuid]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for id in ids {
            batch.remove(&id.as_bytes()[..]);
        }
        self.keywords_tree.apply_batch(batch)?;
        self.flush().await
    }

    async fn save_lookup(&self, lookup: &CurationLookup) -> Result<()> {
        self.lookups_tree
            .insert(lookup.id.as_bytes(), Self::encode(lookup)?)?;
        self.flush().await
    }

    async fn list_lookups(&self, kind: LookupKind) -> Result<Vec<CurationLookup>> {
        Ok(Self::scan::<CurationLookup>(&self.lookups_tree)?
            .into_iter()
            .filter(|lookup| lookup.kind == kind)
            .collect())
    }

    async fn delete_lookups_for(&self, kind: LookupKind, target: &ContentRef) -> Result<usize> {
        let stale: Vec<CurationLookup> = self
            .list_lookups(kind)
            .await?
            .into_iter()
            .filter(|lookup| lookup.target == *target)
            .collect();

        let mut batch = sled::Batch::default();
        for lookup in &stale {
            batch.remove(&lookup.id.as_bytes()[..]);
        }
        self.lookups_tree.apply_batch(batch)?;
        self.flush().await?;
        Ok(stale.len())
    }
}

#[async_trait]
impl SettingStore for SledStore {
    async fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let mut settings = Vec::new();
        for item in self.settings_tree.iter() {
            let (key, value) = item?;
            settings.push((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
        Ok(settings)
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.settings_tree.insert(key.as_bytes(), value.as_bytes())?;
        self.flush().await
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        self.settings_tree.remove(key.as_bytes())?;
        self.flush().await
    }
}

#[async_trait]
impl PageStore for SledStore {
    async fn save_page(&self, page: &Page) -> Result<()> {
        self.pages_tree
            .insert(page.id.as_bytes(), Self::encode(page)?)?;
        self.flush().await
    }

    async fn get_page(&self, id: &Uuid) -> Result<Option<Page>> {
        Self::get_record(&self.pages_tree, id)
    }

    async fn list_pages(&self) -> Result<Vec<Page>> {
        let mut pages: Vec<Page> = Self::scan(&self.pages_tree)?;
        pages.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (SledStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SledStore::new(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_get_team() {
        let (store, _temp) = create_test_store();
        let team = Team::new("Digital").with_slug("digital");

        store.save_team(&team).await.unwrap();

        let retrieved = store.get_team(&team.id).await.unwrap().unwrap();
        assert_eq!(retrieved, team);
        assert_eq!(
            store.find_team_by_slug("digital").await.unwrap().unwrap().id,
            team.id
        );
    }

    #[tokio::test]
    async fn test_tree_rows_by_parent_and_child() {
        let (store, _temp) = create_test_store();
        let (root, child) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .insert_tree_rows(&[
                TeamTreeEntry::new(root, root, 0),
                TeamTreeEntry::new(child, child, 0),
                TeamTreeEntry::new(root, child, 1),
            ])
            .await
            .unwrap();

        assert_eq!(store.tree_rows_for_parent(&root).await.unwrap().len(), 2);
        assert_eq!(store.tree_rows_for_child(&child).await.unwrap().len(), 2);
        assert_eq!(
            store.tree_rows_at_depth(1).await.unwrap(),
            vec![TeamTreeEntry::new(root, child, 1)]
        );
    }

    #[tokio::test]
    async fn test_insert_duplicate_tree_row_is_integrity_error() {
        let (store, _temp) = create_test_store();
        let id = Uuid::new_v4();
        let row = TeamTreeEntry::new(id, id, 0);

        store.insert_tree_rows(&[row]).await.unwrap();
        let result = store.insert_tree_rows(&[row]).await;
        assert!(matches!(result, Err(AppError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_delete_team_removes_tree_rows() {
        let (store, _temp) = create_test_store();
        let team = Team::new("Analysis").with_slug("analysis");
        store.save_team(&team).await.unwrap();
        store
            .insert_tree_rows(&[TeamTreeEntry::new(team.id, team.id, 0)])
            .await
            .unwrap();

        store.delete_team(&team.id).await.unwrap();

        assert!(store.get_team(&team.id).await.unwrap().is_none());
        assert!(store.tree_rows_for_child(&team.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slug_index_follows_renames() {
        let (store, _temp) = create_test_store();
        let mut team = Team::new("Digital").with_slug("digital");
        store.save_team(&team).await.unwrap();

        team.slug = "digital-services".to_string();
        store.save_team(&team).await.unwrap();

        assert!(store.find_team_by_slug("digital").await.unwrap().is_none());
        assert_eq!(
            store.find_team_by_slug("digital-services").await.unwrap().unwrap().id,
            team.id
        );

        // The freed slug can be reused
        let other = Team::new("Digital").with_slug("digital");
        store.save_team(&other).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_slug_leaves_store_unchanged() {
        let (store, _temp) = create_test_store();
        let team = Team::new("Analysis").with_slug("analysis");
        store.save_team(&team).await.unwrap();

        let clash = Team::new("Analysis").with_slug("analysis");
        let result = store.save_team(&clash).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(store.get_team(&clash.id).await.unwrap().is_none());
        assert_eq!(
            store.find_team_by_slug("analysis").await.unwrap().unwrap().id,
            team.id
        );
    }

    #[tokio::test]
    async fn test_delete_team_frees_slug() {
        let (store, _temp) = create_test_store();
        let team = Team::new("Change").with_slug("change");
        store.save_team(&team).await.unwrap();

        store.delete_team(&team.id).await.unwrap();

        assert!(store.find_team_by_slug("change").await.unwrap().is_none());
        assert!(matches!(
            store.delete_team(&team.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_keywords_and_lookups() {
        let (store, _temp) = create_test_store();
        let keep = SearchKeywordOrPhrase::new("leave");
        let drop = SearchKeywordOrPhrase::new("holiday");
        store.save_keyword(&keep).await.unwrap();
        store.save_keyword(&drop).await.unwrap();

        let target = ContentRef::new("tools.tool", Uuid::new_v4());
        store
            .save_lookup(&CurationLookup::new(LookupKind::Pin, keep.id, target.clone()))
            .await
            .unwrap();
        store
            .save_lookup(&CurationLookup::new(LookupKind::Pin, drop.id, target.clone()))
            .await
            .unwrap();

        assert_eq!(store.delete_lookups_for(LookupKind::Pin, &target).await.unwrap(), 2);
        store.delete_keywords(&[drop.id]).await.unwrap();

        assert!(store.list_lookups(LookupKind::Pin).await.unwrap().is_empty());
        assert_eq!(store.list_keywords().await.unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let person = Person::new("Jane", "Smith", "jane.smith@example.gov.uk");

        {
            let store = SledStore::new(temp_dir.path()).unwrap();
            store.save_person(&person).await.unwrap();
            store.put_setting("boost_parts__query_types__phrase", "12.0").await.unwrap();
        }

        let store = SledStore::new(temp_dir.path()).unwrap();
        assert_eq!(store.get_person(&person.id).await.unwrap().unwrap(), person);
        assert_eq!(
            store.list_settings().await.unwrap(),
            vec![("boost_parts__query_types__phrase".to_string(), "12.0".to_string())]
        );
    }
}
