//! End-to-end scenarios against the in-memory directory.

mod common;

use chrono::Utc;
use common::{hub, server, session_on, Event, NC};
use dsrepl::cursor::get_replication_cursors;
use dsrepl::failure::{get_replication_connection_failures, FailureLedger};
use dsrepl::metadata::get_replication_metadata;
use dsrepl::neighbor::{get_replication_neighbors, get_replication_targets};
use dsrepl::orchestrator::{AbortCause, PartnerState, RunState, SyncEventKind};
use dsrepl::queue::{get_replication_operation_information, ReplicationOperationType};
use dsrepl::trust::{
    ForestTrustCollisionType, ForestTrustDomainInformation, ForestTrustRelationshipInformation,
    TopLevelName, TopLevelNameStatus, TrustDirection, TrustStore,
};
use dsrepl::{ErrorKind, SyncOptions, SyncOrchestrator};
use std::collections::HashMap;
use std::sync::Arc;

fn recorder(events: &mut Vec<Event>) -> impl FnMut(&dsrepl::orchestrator::SyncProgress<'_>) -> bool + '_ {
    move |p| {
        events.push((
            p.event,
            p.target.unwrap_or_default().to_string(),
            p.source.unwrap_or_default().to_string(),
        ));
        true
    }
}

#[tokio::test]
async fn test_one_unreachable_partner_of_three() {
    let dir = hub(&["a", "b", "c"]).await;
    dir.set_reachable("b", false).await;

    let ledger = Arc::new(FailureLedger::new());
    ledger.record_failure("home", "a", 1722, "earlier outage", Utc::now());
    ledger.record_failure("home", "c", 1722, "earlier outage", Utc::now());
    ledger.record_failure("home", "c", 1722, "earlier outage", Utc::now());

    let session = session_on(&dir, "home").await;
    let orch = SyncOrchestrator::new(session, SyncOptions::default()).with_ledger(ledger.clone());

    let mut events = Vec::new();
    let report = orch.sync_all(NC, recorder(&mut events)).await.unwrap();

    assert_eq!(report.state, RunState::Finished);
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.outcome("a").unwrap().state, PartnerState::Completed);
    assert_eq!(report.outcome("b").unwrap().state, PartnerState::Failed);
    assert_eq!(report.outcome("c").unwrap().state, PartnerState::Completed);
    assert_eq!(report.unreachable_partners(), vec!["b"]);

    assert_eq!(ledger.consecutive_failures("home", "a"), 0);
    assert_eq!(ledger.consecutive_failures("home", "b"), 1);
    assert_eq!(ledger.consecutive_failures("home", "c"), 0);

    let errors: Vec<_> = events.iter().filter(|e| e.0 == SyncEventKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, "home");
    assert_eq!(errors[0].2, "b");

    let report = orch.sync_all(NC, |_| true).await.unwrap();
    assert!(report.is_finished());
    assert_eq!(ledger.consecutive_failures("home", "b"), 2);
}

#[tokio::test]
async fn test_unreachable_partner_never_blocks_later_partners() {
    for skip_initial_check in [false, true] {
        let dir = hub(&["a", "b", "c"]).await;
        dir.set_reachable("a", false).await;
        let session = session_on(&dir, "home").await;
        let options = SyncOptions {
            skip_initial_check,
            ..SyncOptions::default()
        };
        let report = SyncOrchestrator::new(session, options)
            .sync_all(NC, |_| true)
            .await
            .unwrap();

        assert!(report.is_finished());
        assert_eq!(report.completed(), 2);
        let synced: Vec<_> = dir
            .sync_log()
            .await
            .into_iter()
            .filter(|s| s.succeeded)
            .map(|s| s.source)
            .collect();
        assert_eq!(synced, vec!["b".to_string(), "c".to_string()]);
    }
}

#[tokio::test]
async fn test_aliveness_only_mutates_nothing() {
    let dir = hub(&["a", "b"]).await;
    dir.write_attribute("a", "CN=x,DC=corp,DC=example", "cn", &["x"]).await.unwrap();
    dir.set_reachable("b", false).await;
    let session = session_on(&dir, "home").await;
    let cursors_before = get_replication_cursors(&session, NC).await.unwrap();

    let options = SyncOptions {
        check_aliveness_only: true,
        skip_initial_check: true,
        ..SyncOptions::default()
    };
    let orch = SyncOrchestrator::new(session.clone(), options);
    let mut events = Vec::new();
    let report = orch.sync_all(NC, recorder(&mut events)).await.unwrap();

    assert!(report.is_finished());
    assert!(dir.sync_log().await.is_empty());
    assert_eq!(dir.probe_count().await, 2);
    assert!(orch.ledger().is_empty());
    assert_eq!(get_replication_cursors(&session, NC).await.unwrap(), cursors_before);
    assert!(get_replication_connection_failures(&session).await.unwrap().is_empty());

    let a = report.outcome("a").unwrap();
    assert_eq!(a.reachable, Some(true));
    assert_eq!(a.state, PartnerState::Completed);
    assert!(a.cursor_before.is_none() && a.cursor_after.is_none());
    assert_eq!(report.outcome("b").unwrap().reachable, Some(false));

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, SyncEventKind::Error);
}

#[tokio::test]
async fn test_progress_events_are_well_nested() {
    let dir = hub(&["a", "b", "c", "d"]).await;
    dir.fail_sync("home", "b", 8606, "insufficient attributes").await;
    dir.set_reachable("d", false).await;
    let session = session_on(&dir, "home").await;
    let options = SyncOptions {
        skip_initial_check: true,
        ..SyncOptions::default()
    };

    let mut events = Vec::new();
    SyncOrchestrator::new(session, options)
        .sync_all(NC, recorder(&mut events))
        .await
        .unwrap();

    let mut open: HashMap<(String, String), usize> = HashMap::new();
    for (kind, target, source) in &events {
        let key = (target.clone(), source.clone());
        match kind {
            SyncEventKind::SyncStarted => *open.entry(key).or_default() += 1,
            SyncEventKind::SyncCompleted | SyncEventKind::Error => {
                let n = open.get_mut(&key).expect("close without start");
                assert!(*n > 0);
                *n -= 1;
            }
        }
    }
    assert!(open.values().all(|n| *n == 0));
    assert_eq!(
        events.iter().filter(|e| e.0 == SyncEventKind::SyncStarted).count(),
        4
    );
}

#[tokio::test]
async fn test_abort_keeps_outcomes_gathered_so_far() {
    let dir = hub(&["a", "b", "c"]).await;
    dir.set_reachable("b", false).await;
    let session = session_on(&dir, "home").await;
    let options = SyncOptions {
        abort_on_unreachable: true,
        skip_initial_check: true,
        ..SyncOptions::default()
    };
    let report = SyncOrchestrator::new(session, options)
        .sync_all(NC, |_| true)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Aborted);
    match &report.abort_cause {
        Some(AbortCause::Unreachable(err)) => assert_eq!(err.code(), Some(1722)),
        other => panic!("unexpected cause: {other:?}"),
    }
    assert_eq!(report.outcome("a").unwrap().state, PartnerState::Completed);
    assert_eq!(report.outcome("b").unwrap().state, PartnerState::Failed);
    assert_eq!(report.outcome("c").unwrap().state, PartnerState::Pending);
}

#[tokio::test]
async fn test_cross_site_partners_filtered() {
    let dir = hub(&["local"]).await;
    dir.add_server(common::server("remote").with_site("Tokyo")).await;
    dir.link("home", "remote", NC).await.unwrap();

    let session = session_on(&dir, "home").await;
    let report = SyncOrchestrator::new(session.clone(), SyncOptions::default())
        .sync_all(NC, |_| true)
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcome("remote").is_none());

    let options = SyncOptions {
        cross_site: true,
        ..SyncOptions::default()
    };
    let report = SyncOrchestrator::new(session, options)
        .sync_all(NC, |_| true)
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 2);
}

#[tokio::test]
async fn test_cursor_monotonic_after_sync() {
    let dir = hub(&["a"]).await;
    let session = session_on(&dir, "home").await;
    let a_id = dir_invocation(&dir, "a").await;

    let mut previous = 0;
    for round in 0..3 {
        dir.write_attribute("a", "CN=x,DC=corp,DC=example", "description", &[&format!("r{round}")])
            .await
            .unwrap();
        session.sync_replica_from_server(NC, "a").await.unwrap();
        let cursors = get_replication_cursors(&session, NC).await.unwrap();
        let usn = cursors.by_invocation(&a_id).unwrap().up_to_date_usn;
        assert!(usn >= previous);
        previous = usn;
    }
    assert_eq!(previous, 3);
}

async fn dir_invocation(dir: &Arc<dsrepl::memory::InMemoryDirectory>, name: &str) -> dsrepl::types::InvocationId {
    session_on(dir, name).await.server().invocation_id
}

#[tokio::test]
async fn test_metadata_reads_are_idempotent() {
    let dir = hub(&["a"]).await;
    let dn = "CN=Carol,DC=corp,DC=example";
    dir.write_attribute("a", dn, "mail", &["carol@corp.example"]).await.unwrap();
    dir.write_attribute("a", dn, "telephoneNumber", &["555-0100"]).await.unwrap();
    dir.write_attribute("a", dn, "mail", &["c@corp.example"]).await.unwrap();
    let session = session_on(&dir, "a").await;

    let first = get_replication_metadata(&session, dn).await.unwrap();
    let second = get_replication_metadata(&session, dn).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.names().collect::<Vec<_>>(), vec!["mail", "telephoneNumber"]);

    let by_lookup = first.get("MAIL").unwrap();
    let by_scan = first.iter().find(|m| m.name == "mail").unwrap();
    assert_eq!(by_lookup, by_scan);
    assert_eq!(by_lookup.version, 2);

    let missing = get_replication_metadata(&session, "CN=Nobody,DC=corp,DC=example").await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::ObjectNotFound);
}

#[tokio::test]
async fn test_operation_queue_snapshot_order() {
    let dir = hub(&[]).await;
    dir.enqueue_operation("home", ReplicationOperationType::Sync, NC, "a", 5).await.unwrap();
    dir.enqueue_operation("home", ReplicationOperationType::Modify, NC, "b", 1).await.unwrap();
    dir.enqueue_operation("home", ReplicationOperationType::Add, NC, "c", 5).await.unwrap();
    let session = session_on(&dir, "home").await;

    let info = get_replication_operation_information(&session).await.unwrap();
    let sources: Vec<_> = info.pending_operations().iter().map(|o| o.source_server.as_str()).collect();
    assert_eq!(sources, vec!["b", "a", "c"]);
    assert!(info.current_operation().is_none());

    dir.start_next_operation("home").await.unwrap();
    let info = get_replication_operation_information(&session).await.unwrap();
    assert_eq!(info.current_operation().unwrap().source_server, "b");
    assert!(info.operation_start_time().is_some());
    assert_eq!(info.pending_operations().len(), 2);
}

#[tokio::test]
async fn test_neighbors_and_targets_reflect_sync_history() {
    let dir = hub(&["a"]).await;
    dir.fail_sync("home", "a", 8453, "replication access denied").await;
    let session = session_on(&dir, "home").await;
    assert!(session.sync_replica_from_server(NC, "a").await.is_err());

    let neighbors = get_replication_neighbors(&session, NC).await.unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].partner_server, "a");
    assert_eq!(neighbors[0].last_sync_result, 8453);
    assert_eq!(neighbors[0].consecutive_failure_count, 1);
    assert!(neighbors[0].last_successful_sync.is_none());

    let a = session_on(&dir, "a").await;
    let targets = get_replication_targets(&a, NC).await.unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].partner_server, "home");
}

fn fabrikam() -> ForestTrustRelationshipInformation {
    ForestTrustRelationshipInformation::new("corp.example", "fabrikam.com", TrustDirection::Bidirectional)
        .with_top_level_name(TopLevelName::new("fabrikam.com"))
        .with_top_level_name(TopLevelName::new("contoso.com"))
        .with_domain(ForestTrustDomainInformation::new(
            "fabrikam.com",
            "FABRIKAM",
            "S-1-5-21-100-200-300",
        ))
}

#[tokio::test]
async fn test_contoso_top_level_name_collision() {
    let dir = hub(&[]).await;
    dir.add_trust("corp.example", fabrikam()).await;
    let session = session_on(&dir, "home").await;
    let store = TrustStore::new(&session);
    let before = store.get_all_trust_relationships().await.unwrap();

    let proposed = ForestTrustRelationshipInformation::new("corp.example", "contoso.com", TrustDirection::Outbound)
        .with_top_level_name(TopLevelName::new("contoso.com"));

    let collisions = store.evaluate(&proposed).await.unwrap();
    assert_eq!(collisions.len(), 1);
    assert_eq!(collisions[0].collision_type, ForestTrustCollisionType::TopLevelName);
    assert!(collisions[0].top_level_name_options.disabled_by_conflict);
    assert_eq!(collisions[0].conflicting_forest, "fabrikam.com");

    let err = store.save(&proposed).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Collision);
    assert_eq!(store.get_all_trust_relationships().await.unwrap(), before);
}

#[tokio::test]
async fn test_admin_disabled_name_saves_with_warning() {
    let dir = hub(&[]).await;
    dir.add_trust("corp.example", fabrikam()).await;
    let session = session_on(&dir, "home").await;
    let store = TrustStore::new(&session);

    let proposed = ForestTrustRelationshipInformation::new("corp.example", "contoso.com", TrustDirection::Outbound)
        .with_top_level_name(TopLevelName::with_status("contoso.com", TopLevelNameStatus::AdminDisabled))
        .with_top_level_name(TopLevelName::new("sales.contoso.net"));

    let warnings = store.save(&proposed).await.unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].top_level_name_options.disabled_by_admin);
    assert_eq!(store.get_all_trust_relationships().await.unwrap().len(), 2);
    assert_eq!(store.get_trust_relationship("CONTOSO.COM").await.unwrap(), proposed);
}

#[tokio::test]
async fn test_trust_flags_round_trip() {
    let dir = hub(&[]).await;
    dir.add_trust("corp.example", fabrikam()).await;
    let session = session_on(&dir, "home").await;
    let store = TrustStore::new(&session);

    assert!(!store.get_selective_authentication_status("fabrikam.com").await.unwrap());
    assert!(store.get_sid_filtering_status("fabrikam.com").await.unwrap());

    store.set_selective_authentication_status("fabrikam.com", true).await.unwrap();
    store.set_sid_filtering_status("fabrikam.com", false).await.unwrap();
    assert!(store.get_selective_authentication_status("fabrikam.com").await.unwrap());
    assert!(!store.get_sid_filtering_status("fabrikam.com").await.unwrap());

    let err = store.get_sid_filtering_status("northwind.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
}

#[tokio::test]
async fn test_transitive_run_advances_partner_cursor() {
    let dir = hub(&["a"]).await;
    dir.add_server(server("far")).await;
    dir.link("a", "far", NC).await.unwrap();
    dir.write_attribute("far", "CN=y,DC=corp,DC=example", "cn", &["y"]).await.unwrap();
    let far_id = dir_invocation(&dir, "far").await;

    let session = session_on(&dir, "home").await;
    let report = SyncOrchestrator::new(session.clone(), SyncOptions::default())
        .sync_all(NC, |_| true)
        .await
        .unwrap();
    assert!(report.is_finished());

    let a = session_on(&dir, "a").await;
    let cursors = get_replication_cursors(&a, NC).await.unwrap();
    assert_eq!(cursors.by_invocation(&far_id).unwrap().up_to_date_usn, 1);
}
