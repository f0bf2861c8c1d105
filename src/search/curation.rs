//! Manual pin and exclude curation of search results

use crate::models::{
    normalize_keyword_or_phrase, ContentRef, CurationLookup, LookupKind, SearchKeywordOrPhrase,
};
use crate::search::error::SearchResult;
use crate::search::sanitize::split_query;
use crate::state::CurationStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Keeps the keyword/phrase lookups that pin or exclude content
pub struct CurationService {
    store: Arc<dyn CurationStore>,
}

impl CurationService {
    pub fn new(store: Arc<dyn CurationStore>) -> Self {
        Self { store }
    }

    /// Replace the phrases pinning `target` with the comma-separated `phrases`
    pub async fn manage_pinned(&self, target: &ContentRef, phrases: &str) -> SearchResult<Vec<String>> {
        self.manage(LookupKind::Pin, target, phrases).await
    }

    /// Replace the phrases excluding `target` with the comma-separated `phrases`
    pub async fn manage_excluded(
        &self,
        target: &ContentRef,
        phrases: &str,
    ) -> SearchResult<Vec<String>> {
        self.manage(LookupKind::Exclusion, target, phrases).await
    }

    async fn manage(
        &self,
        kind: LookupKind,
        target: &ContentRef,
        phrases: &str,
    ) -> SearchResult<Vec<String>> {
        let removed = self.store.delete_lookups_for(kind, target).await?;
        debug!(kind = %kind, target = %target.document_id(), removed, "Cleared curation lookups");

        let mut saved = Vec::new();
        for term in phrases.split(',') {
            let keyword_or_phrase = normalize_keyword_or_phrase(term);
            if keyword_or_phrase.is_empty() || saved.contains(&keyword_or_phrase) {
                continue;
            }

            let keyword = match self.store.find_keyword(&keyword_or_phrase).await? {
                Some(keyword) => keyword,
                None => {
                    let keyword = SearchKeywordOrPhrase::new(keyword_or_phrase.clone());
                    self.store.save_keyword(&keyword).await?;
                    keyword
                }
            };

            self.store
                .save_lookup(&CurationLookup::new(kind, keyword.id, target.clone()))
                .await?;
            saved.push(keyword_or_phrase);
        }

        self.remove_orphan_keywords().await?;
        info!(
            kind = %kind,
            target = %target.document_id(),
            phrases = ?saved,
            "Updated search curation"
        );
        Ok(saved)
    }

    /// Delete keywords no lookup refers to any more
    pub async fn remove_orphan_keywords(&self) -> SearchResult<usize> {
        let mut used = HashSet::new();
        for kind in [LookupKind::Pin, LookupKind::Exclusion] {
            used.extend(
                self.store
                    .list_lookups(kind)
                    .await?
                    .into_iter()
                    .map(|lookup| lookup.keyword_id),
            );
        }

        let orphans: Vec<_> = self
            .store
            .list_keywords()
            .await?
            .into_iter()
            .filter(|keyword| !used.contains(&keyword.id))
            .map(|keyword| keyword.id)
            .collect();

        if !orphans.is_empty() {
            self.store.delete_keywords(&orphans).await?;
            debug!(count = orphans.len(), "Removed orphaned search keywords");
        }
        Ok(orphans.len())
    }

    /// Phrases currently attached to `target`, sorted
    pub async fn phrases_for(&self, kind: LookupKind, target: &ContentRef) -> SearchResult<Vec<String>> {
        let keyword_ids: HashSet<_> = self
            .store
            .list_lookups(kind)
            .await?
            .into_iter()
            .filter(|lookup| &lookup.target == target)
            .map(|lookup| lookup.keyword_id)
            .collect();

        let mut phrases: Vec<String> = self
            .store
            .list_keywords()
            .await?
            .into_iter()
            .filter(|keyword| keyword_ids.contains(&keyword.id))
            .map(|keyword| keyword.keyword_or_phrase)
            .collect();
        phrases.sort();
        Ok(phrases)
    }

    /// Objects pinned by any keyword or phrase of the query
    pub async fn pinned(&self, query: &str) -> SearchResult<Vec<ContentRef>> {
        self.matching(LookupKind::Pin, query).await
    }

    /// Objects excluded by any keyword or phrase of the query
    pub async fn excluded(&self, query: &str) -> SearchResult<Vec<ContentRef>> {
        self.matching(LookupKind::Exclusion, query).await
    }

    async fn matching(&self, kind: LookupKind, query: &str) -> SearchResult<Vec<ContentRef>> {
        let parts: HashSet<String> = split_query(query)
            .iter()
            .map(|part| normalize_keyword_or_phrase(part))
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            return Ok(Vec::new());
        }

        let keyword_ids: HashSet<_> = self
            .store
            .list_keywords()
            .await?
            .into_iter()
            .filter(|keyword| parts.contains(&keyword.keyword_or_phrase))
            .map(|keyword| keyword.id)
            .collect();
        if keyword_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        Ok(self
            .store
            .list_lookups(kind)
            .await?
            .into_iter()
            .filter(|lookup| keyword_ids.contains(&lookup.keyword_id))
            .map(|lookup| lookup.target)
            .filter(|target| seen.insert(target.clone()))
            .collect())
    }
}
