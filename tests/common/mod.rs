//! Shared fixtures for the integration tests

#![allow(dead_code)]

use digital_workspace::models::{Team, TeamTreeEntry};
use digital_workspace::state::{AppCache, DirectoryStore};
use digital_workspace::teams::{TeamDraft, TeamService};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn team_service(store: Arc<dyn DirectoryStore>) -> TeamService {
    TeamService::new(store, AppCache::new(1_000, Duration::from_secs(3600)))
}

pub fn draft(name: &str) -> TeamDraft {
    TeamDraft {
        name: name.to_string(),
        ..Default::default()
    }
}

/// `DIT -> {COO -> {Analysis, Change}, GTI -> {Investment, DEFEND}}`
pub struct Dit {
    pub dit: Team,
    pub coo: Team,
    pub analysis: Team,
    pub change: Team,
    pub gti: Team,
    pub investment: Team,
    pub defend: Team,
}

impl Dit {
    pub async fn build(service: &TeamService) -> Self {
        let dit = service.create_root_team(draft("DIT"), None).await.unwrap();
        let coo = service.create_team(draft("COO"), dit.id, None).await.unwrap();
        let analysis = service.create_team(draft("Analysis"), coo.id, None).await.unwrap();
        let change = service.create_team(draft("Change"), coo.id, None).await.unwrap();
        let gti = service.create_team(draft("GTI"), dit.id, None).await.unwrap();
        let investment = service.create_team(draft("Investment"), gti.id, None).await.unwrap();
        let defend = service.create_team(draft("DEFEND"), gti.id, None).await.unwrap();

        Self {
            dit,
            coo,
            analysis,
            change,
            gti,
            investment,
            defend,
        }
    }
}

pub fn names(teams: &[Team]) -> Vec<&str> {
    teams.iter().map(|team| team.name.as_str()).collect()
}

/// Every team has one self row plus one row per ancestor at its distance,
/// exactly one team has no ancestors, and no row outlives its team.
pub async fn assert_closure_invariants(service: &TeamService) {
    let store = service.store();
    let teams = store.list_teams().await.unwrap();
    let mut roots = 0;
    let mut expected_rows = 0;

    for team in &teams {
        let rows = store.tree_rows_for_child(&team.id).await.unwrap();
        let self_rows: Vec<&TeamTreeEntry> = rows.iter().filter(|row| row.depth == 0).collect();
        assert_eq!(
            self_rows,
            vec![&TeamTreeEntry::new(team.id, team.id, 0)],
            "self row of {}",
            team.name
        );

        let mut chain: Vec<Uuid> = Vec::new();
        let mut current = team.clone();
        while let Some(parent) = service.get_immediate_parent_team(&current).await.unwrap() {
            assert!(chain.len() < teams.len(), "cycle above {}", team.name);
            chain.push(parent.id);
            current = parent;
        }

        let mut ancestors: Vec<(u32, Uuid)> = rows
            .iter()
            .filter(|row| row.depth > 0)
            .map(|row| (row.depth, row.parent))
            .collect();
        ancestors.sort();
        let walked: Vec<(u32, Uuid)> = chain
            .iter()
            .enumerate()
            .map(|(distance, id)| (distance as u32 + 1, *id))
            .collect();
        assert_eq!(ancestors, walked, "ancestor rows of {}", team.name);

        if chain.is_empty() {
            roots += 1;
        }
        expected_rows += chain.len() + 1;
    }

    assert_eq!(roots, 1, "teams without a parent");
    let total = store.tree_rows_at_depth(0).await.unwrap().len()
        + store.tree_rows_deeper_than(0).await.unwrap().len();
    assert_eq!(total, expected_rows, "closure rows for missing teams");
}
