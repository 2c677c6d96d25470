//! Snapshot reconciliation against an in-memory database

mod common;

use common::{harness, instance};
use tunneldeck_agent_client::AgentClientError;
use tunneldeck_control::{ControlError, ReconcileError};
use tunneldeck_db::{EndpointStore, StoreError, SystemFacts, TunnelStore};
use tunneldeck_proto::{RemoteInstance, SystemInfo};

const SERVER_URL: &str = "server://pass@[2001:db8::1]:9000/10.0.0.1:8080?tls=1&min=4&max=16";
const CLIENT_URL: &str = "client://:2000/10.0.0.2:22";

#[tokio::test]
async fn test_reconcile_converges_to_snapshot() {
    let h = harness().await;
    h.agent.set_snapshot(Some(vec![
        instance("a1", "", SERVER_URL),
        instance("b2", "ssh", CLIENT_URL),
    ]));

    let report = h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.tunnel_count, 2);

    let tunnels = TunnelStore::new(&h.db);
    let a1 = tunnels.find(h.endpoint.id, "a1").await.unwrap().unwrap();
    assert_eq!(a1.name, "auto-a1");
    assert_eq!(a1.tunnel_address, "[2001:db8::1]");
    assert_eq!(a1.tunnel_port, 9000);
    assert_eq!(a1.target_port, 8080);
    assert_eq!(a1.tls_mode, "mode1");
    assert_eq!(a1.min, Some(4));
    assert_eq!(a1.password, "pass");

    let b2 = tunnels.find(h.endpoint.id, "b2").await.unwrap().unwrap();
    assert_eq!(b2.name, "ssh");
    assert_eq!(b2.mode, "client");

    // b2 disappears, c3 shows up
    h.agent.set_snapshot(Some(vec![
        instance("a1", "", SERVER_URL),
        instance("c3", "", CLIENT_URL),
    ]));
    let report = h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.removed, vec!["b2".to_string()]);

    let mut ids = tunnels.instance_ids(h.endpoint.id).await.unwrap();
    ids.sort();
    assert_eq!(ids, vec!["a1".to_string(), "c3".to_string()]);

    let endpoint = EndpointStore::new(&h.db).get(h.endpoint.id).await.unwrap();
    assert_eq!(endpoint.tunnel_count, 2);
}

#[tokio::test]
async fn test_reconcile_twice_is_noop() {
    let h = harness().await;
    h.agent.set_snapshot(Some(vec![
        instance("a1", "web", SERVER_URL),
        instance("b2", "", CLIENT_URL),
    ]));

    h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    let before = TunnelStore::new(&h.db)
        .list_for_endpoint(h.endpoint.id)
        .await
        .unwrap();

    let report = h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(report.unchanged, 2);

    let after = TunnelStore::new(&h.db)
        .list_for_endpoint(h.endpoint.id)
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_alias_replaces_generated_name_and_sticks() {
    let h = harness().await;
    let tunnels = TunnelStore::new(&h.db);

    h.agent
        .set_snapshot(Some(vec![instance("a1", "", SERVER_URL)]));
    h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    let row = tunnels.find(h.endpoint.id, "a1").await.unwrap().unwrap();
    assert_eq!(row.name, "auto-a1");

    h.agent
        .set_snapshot(Some(vec![instance("a1", "web", SERVER_URL)]));
    let report = h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    assert_eq!(report.updated, 1);
    let row = tunnels.find(h.endpoint.id, "a1").await.unwrap().unwrap();
    assert_eq!(row.name, "web");

    h.agent
        .set_snapshot(Some(vec![instance("a1", "", SERVER_URL)]));
    let report = h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    assert!(report.is_noop());
    let row = tunnels.find(h.endpoint.id, "a1").await.unwrap().unwrap();
    assert_eq!(row.name, "web");
}

#[tokio::test]
async fn test_fetch_failure_changes_nothing() {
    let h = harness().await;
    h.agent
        .set_snapshot(Some(vec![instance("a1", "", SERVER_URL)]));
    h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();

    h.agent.set_snapshot(None);
    let err = h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Reconcile(ReconcileError::Fetch(AgentClientError::ConnectionFailed(_)))
    ));

    let ids = TunnelStore::new(&h.db)
        .instance_ids(h.endpoint.id)
        .await
        .unwrap();
    assert_eq!(ids, vec!["a1".to_string()]);
}

#[tokio::test]
async fn test_unknown_entries_are_skipped_and_not_kept() {
    let h = harness().await;
    let not_a_tunnel = RemoteInstance {
        id: "x9".to_string(),
        kind: "master".to_string(),
        ..Default::default()
    };
    h.agent.set_snapshot(Some(vec![
        instance("a1", "", SERVER_URL),
        not_a_tunnel,
    ]));

    let report = h.fleet.refresh_tunnels(h.endpoint.id).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.tunnel_count, 1);
}

#[tokio::test]
async fn test_missing_endpoint() {
    let h = harness().await;
    let err = h.fleet.refresh_tunnels(999).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Store(StoreError::EndpointNotFound(999))
    ));
}

#[tokio::test]
async fn test_reconcile_all_reports_per_endpoint() {
    let h = harness().await;
    h.agent
        .set_snapshot(Some(vec![instance("a1", "", SERVER_URL)]));

    let results = h.fleet.reconcile_all().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, h.endpoint.id);
    assert_eq!(results[0].1.as_ref().unwrap().inserted, 1);
}

#[tokio::test]
async fn test_system_info_refresh_falls_back_to_stored() {
    let h = harness().await;
    h.agent.set_info(Some(SystemInfo {
        os: "linux".to_string(),
        arch: "amd64".to_string(),
        ver: "1.4.0".to_string(),
        tls: "1".to_string(),
        uptime: Some(120),
        ..Default::default()
    }));

    let refreshed = h.fleet.refresh_system_info(h.endpoint.id).await.unwrap();
    assert!(refreshed.fresh);
    assert_eq!(refreshed.facts.os.as_deref(), Some("linux"));
    assert_eq!(refreshed.facts.crt, None);

    let stored = EndpointStore::new(&h.db).get(h.endpoint.id).await.unwrap();
    assert_eq!(stored.ver.as_deref(), Some("1.4.0"));
    assert!(stored.last_check.is_some());

    h.agent.set_info(None);
    let fallback = h.fleet.refresh_system_info(h.endpoint.id).await.unwrap();
    assert!(!fallback.fresh);
    assert_eq!(fallback.facts, SystemFacts::from_model(&stored));
}

#[tokio::test]
async fn test_stored_zero_uptime_is_not_reported() {
    let h = harness().await;
    h.agent.set_info(Some(SystemInfo {
        os: "linux".to_string(),
        uptime: Some(0),
        ..Default::default()
    }));
    h.fleet.refresh_system_info(h.endpoint.id).await.unwrap();

    h.agent.set_info(None);
    let fallback = h.fleet.refresh_system_info(h.endpoint.id).await.unwrap();
    assert_eq!(fallback.facts.os.as_deref(), Some("linux"));
    assert_eq!(fallback.facts.uptime, None);
}
