//! Team hierarchy behaviour against every store backend

mod common;

use common::{assert_closure_invariants, draft, names, team_service, Dit};
use digital_workspace::error::AppError;
use digital_workspace::models::TeamTreeEntry;
use digital_workspace::state::{DirectoryStore, InMemoryStore, SledStore};
use digital_workspace::teams::TeamService;
use std::sync::Arc;
use tempfile::TempDir;

async fn all_rows(service: &TeamService) -> Vec<TeamTreeEntry> {
    let mut rows = service.store().tree_rows_deeper_than(0).await.unwrap();
    rows.extend(service.store().tree_rows_at_depth(0).await.unwrap());
    rows.sort_by_key(|row| (row.parent, row.child, row.depth));
    rows
}

/// Test suite that runs against any DirectoryStore implementation
async fn test_dit_scenario(store: Arc<dyn DirectoryStore>) {
    let service = team_service(store);
    let dit = Dit::build(&service).await;
    assert_closure_invariants(&service).await;

    assert_eq!(
        names(&service.get_all_child_teams(&dit.dit).await.unwrap()),
        vec!["COO", "GTI", "Analysis", "Change", "DEFEND", "Investment"]
    );

    // Self rows and ancestor counts
    for team in [&dit.dit, &dit.coo, &dit.gti, &dit.investment] {
        let rows = service.store().tree_rows_for_child(&team.id).await.unwrap();
        assert_eq!(rows.iter().filter(|row| row.depth == 0).count(), 1);
    }
    let ancestors = service.get_all_parent_teams(&dit.investment).await.unwrap();
    assert_eq!(names(&ancestors), vec!["DIT", "GTI"]);

    // Move GTI under COO
    let gti_subtree = service.get_all_child_teams(&dit.gti).await.unwrap();
    service.update_team_parent(&dit.gti, &dit.coo).await.unwrap();
    assert_closure_invariants(&service).await;

    assert_eq!(
        names(&service.get_immediate_child_teams(&dit.dit).await.unwrap()),
        vec!["COO"]
    );
    let coo_children = names(&service.get_all_child_teams(&dit.coo).await.unwrap())
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    for name in ["GTI", "Investment", "DEFEND", "Analysis", "Change"] {
        assert!(coo_children.iter().any(|child| child == name), "{name} missing");
    }
    assert_eq!(
        service
            .get_immediate_parent_team(&dit.gti)
            .await
            .unwrap()
            .map(|team| team.id),
        Some(dit.coo.id)
    );
    assert_eq!(service.get_all_child_teams(&dit.gti).await.unwrap(), gti_subtree);
    assert_eq!(
        names(&service.get_all_parent_teams(&dit.defend).await.unwrap()),
        vec!["DIT", "COO", "GTI"]
    );
    let defend_rows = service.store().tree_rows_for_child(&dit.defend.id).await.unwrap();
    assert!(defend_rows.contains(&TeamTreeEntry::new(dit.dit.id, dit.defend.id, 3)));

    // And back again, one level at a time
    service.update_team_parent(&dit.investment, &dit.dit).await.unwrap();
    assert_closure_invariants(&service).await;
    service.update_team_parent(&dit.gti, &dit.dit).await.unwrap();
    assert_closure_invariants(&service).await;
    service.update_team_parent(&dit.investment, &dit.gti).await.unwrap();
    assert_closure_invariants(&service).await;
    assert_eq!(
        names(&service.get_all_parent_teams(&dit.defend).await.unwrap()),
        vec!["DIT", "GTI"]
    );
}

async fn test_cycles_are_rejected(store: Arc<dyn DirectoryStore>) {
    let service = team_service(store);
    let dit = Dit::build(&service).await;
    let before = all_rows(&service).await;

    let err = service
        .update_team_parent(&dit.gti, &dit.investment)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(_)));
    assert_eq!(err.to_string(), "A team's parent cannot be a team's child");

    let err = service.update_team_parent(&dit.gti, &dit.gti).await.unwrap_err();
    assert_eq!(err.to_string(), "A team's parent cannot be the team itself");

    let err = service.update_team_parent(&dit.dit, &dit.coo).await.unwrap_err();
    assert_eq!(err.to_string(), "A team's parent cannot be a team's child");

    assert_eq!(all_rows(&service).await, before);
    assert_closure_invariants(&service).await;
}

async fn test_slug_fallback(store: Arc<dyn DirectoryStore>) {
    let service = team_service(store);
    let dit = Dit::build(&service).await;
    assert_eq!(dit.investment.slug, "investment");

    let second = service
        .create_team(draft("Investment"), dit.coo.id, None)
        .await
        .unwrap();
    assert_eq!(second.slug, "coo-investment");
    assert_closure_invariants(&service).await;

    let unchanged = service.store().get_team(&dit.investment.id).await.unwrap().unwrap();
    assert_eq!(unchanged.slug, "investment");

    // A third collision has nowhere left to go
    let err = service
        .create_team(draft("Investment"), dit.coo.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot generate unique team slug");
    assert_eq!(
        names(&service.get_immediate_child_teams(&dit.coo).await.unwrap()),
        vec!["Analysis", "Change", "Investment"]
    );
    assert_closure_invariants(&service).await;
}

async fn test_failed_edit_changes_nothing(store: Arc<dyn DirectoryStore>) {
    let service = team_service(store);
    let dit = Dit::build(&service).await;
    service
        .create_team(draft("DIT Investment"), dit.coo.id, None)
        .await
        .unwrap();
    let before = all_rows(&service).await;

    // "investment" and "dit-investment" are both taken
    let err = service
        .update_team(&dit.change.id, draft("Investment"), Some(dit.dit.id), None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot generate unique team slug");

    assert_eq!(all_rows(&service).await, before);
    assert_eq!(
        service
            .get_immediate_parent_team(&dit.change)
            .await
            .unwrap()
            .map(|team| team.id),
        Some(dit.coo.id)
    );
    let stored = service.store().get_team(&dit.change.id).await.unwrap().unwrap();
    assert_eq!((stored.name.as_str(), stored.slug.as_str()), ("Change", "change"));
    assert_closure_invariants(&service).await;

    // A valid move with a rename goes through
    let moved = service
        .update_team(&dit.change.id, draft("Change Office"), Some(dit.dit.id), None)
        .await
        .unwrap();
    assert_eq!(moved.slug, "change-office");
    assert_closure_invariants(&service).await;
}

async fn test_single_root(store: Arc<dyn DirectoryStore>) {
    let service = team_service(store);
    let dit = Dit::build(&service).await;

    let err = service.create_root_team(draft("Other"), None).await.unwrap_err();
    assert!(matches!(err, AppError::Domain(_)));
    assert_eq!(service.get_root_team().await.unwrap().id, dit.dit.id);
    assert_closure_invariants(&service).await;

    // The hierarchy stays usable
    service.update_team_parent(&dit.gti, &dit.coo).await.unwrap();
    assert_closure_invariants(&service).await;

    service.delete_team(&dit.defend.id, None).await.unwrap();
    assert_closure_invariants(&service).await;
}

async fn test_select_data(store: Arc<dyn DirectoryStore>) {
    let service = team_service(store);
    Dit::build(&service).await;

    let data = service.get_team_select_data().await.unwrap();
    let entries: Vec<(&str, Option<&str>)> = data
        .iter()
        .map(|d| (d.team_name.as_str(), d.parent_name.as_deref()))
        .collect();

    assert_eq!(
        entries,
        vec![
            ("DIT", None),
            ("COO", Some("DIT")),
            ("GTI", Some("DIT")),
            ("Analysis", Some("COO")),
            ("Change", Some("COO")),
            ("DEFEND", Some("GTI")),
            ("Investment", Some("GTI")),
        ]
    );
}

#[tokio::test]
async fn test_in_memory_store() {
    test_dit_scenario(Arc::new(InMemoryStore::new())).await;
    test_cycles_are_rejected(Arc::new(InMemoryStore::new())).await;
    test_slug_fallback(Arc::new(InMemoryStore::new())).await;
    test_select_data(Arc::new(InMemoryStore::new())).await;
    test_failed_edit_changes_nothing(Arc::new(InMemoryStore::new())).await;
    test_single_root(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn test_sled_store() {
    for suite in 0..6 {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn DirectoryStore> =
            Arc::new(SledStore::new(temp_dir.path().join("workspace.sled")).unwrap());
        match suite {
            0 => test_dit_scenario(store).await,
            1 => test_cycles_are_rejected(store).await,
            2 => test_slug_fallback(store).await,
            3 => test_select_data(store).await,
            4 => test_failed_edit_changes_nothing(store).await,
            _ => test_single_root(store).await,
        }
    }
}

#[tokio::test]
async fn test_sled_hierarchy_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("workspace.sled");

    let (gti, coo) = {
        let service = team_service(Arc::new(SledStore::new(&path).unwrap()));
        let dit = Dit::build(&service).await;
        service.update_team_parent(&dit.gti, &dit.coo).await.unwrap();
        (dit.gti, dit.coo)
    };

    let service = team_service(Arc::new(SledStore::new(&path).unwrap()));
    assert_eq!(
        service
            .get_immediate_parent_team(&gti)
            .await
            .unwrap()
            .map(|team| team.id),
        Some(coo.id)
    );
    assert_eq!(service.get_root_team().await.unwrap().name, "DIT");
}
