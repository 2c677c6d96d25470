//! Deletion cascades, the recycle bin and endpoint statistics

mod common;

use common::{eventually, harness, send};
use tunneldeck_control::ControlError;
use tunneldeck_db::{
    EndpointStore, EventJournal, JournalFilter, RecycleStore, StoreError, TunnelStore,
};

const SERVER_URL: &str = "server://:10101/127.0.0.1:80";

/// Stream two instances with one log line each, then wait until both are stored
async fn populate(h: &common::Harness) -> common::EventFeed {
    let feed = h.agent.queue_stream();
    h.fleet.connect_endpoint(h.endpoint.id).await.unwrap();

    for id in ["a1", "b2"] {
        send(
            &feed,
            "instance",
            &format!(
                r#"{{"type":"create","instance":{{"id":"{}","type":"server","url":"{}","tcprx":10,"udptx":5}}}}"#,
                id, SERVER_URL
            ),
        );
        send(
            &feed,
            "log-line",
            &format!(r#"{{"instance":{{"id":"{}","tcprx":10,"udptx":5}},"logs":"INFO started"}}"#, id),
        );
    }

    let journal = EventJournal::new(&h.db);
    eventually(|| async { journal.count_for_endpoint(h.endpoint.id).await.unwrap() == 4 }).await;
    let tunnels = TunnelStore::new(&h.db);
    eventually(|| async { tunnels.instance_ids(h.endpoint.id).await.unwrap().len() == 2 }).await;
    eventually(|| async {
        let lines = h.fleet.read_file_logs(h.endpoint.id, Some("b2"), 1, 10).await.unwrap();
        lines.len() == 2
    })
    .await;
    feed
}

fn instance_filter(endpoint_id: i64, instance_id: &str) -> JournalFilter {
    let mut filter = JournalFilter::new(endpoint_id);
    filter.instance_id = Some(instance_id.to_string());
    filter
}

#[tokio::test]
async fn test_delete_endpoint_purges_everything() {
    let h = harness().await;
    let _feed = populate(&h).await;

    let tunnel = TunnelStore::new(&h.db)
        .find(h.endpoint.id, "b2")
        .await
        .unwrap()
        .unwrap();
    h.fleet.delete_tunnel(tunnel.id, true).await.unwrap();

    let purge = h.fleet.delete_endpoint(h.endpoint.id).await.unwrap();
    assert_eq!(purge.tunnels, 1);
    assert_eq!(purge.recycled, 1);
    assert_eq!(purge.events, 4);
    assert_eq!(purge.instances, vec!["a1".to_string(), "b2".to_string()]);

    assert!(!h.fleet.manager().is_connected(h.endpoint.id));
    assert!(EndpointStore::new(&h.db)
        .find(h.endpoint.id)
        .await
        .unwrap()
        .is_none());

    let page = h
        .fleet
        .search_events(&JournalFilter::new(h.endpoint.id))
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    for id in ["a1", "b2"] {
        let lines = h
            .fleet
            .read_file_logs(h.endpoint.id, Some(id), 7, 100)
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    let err = h.fleet.delete_endpoint(h.endpoint.id).await.unwrap_err();
    assert!(matches!(err, ControlError::Store(StoreError::EndpointNotFound(_))));
}

#[tokio::test]
async fn test_delete_tunnel_without_recycle_purges_history() {
    let h = harness().await;
    let _feed = populate(&h).await;
    let tunnel = TunnelStore::new(&h.db)
        .find(h.endpoint.id, "a1")
        .await
        .unwrap()
        .unwrap();

    h.fleet.delete_tunnel(tunnel.id, false).await.unwrap();

    let page = h
        .fleet
        .search_events(&instance_filter(h.endpoint.id, "a1"))
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert!(h
        .fleet
        .read_file_logs(h.endpoint.id, Some("a1"), 1, 10)
        .await
        .unwrap()
        .is_empty());

    // The other instance is untouched
    let page = h
        .fleet
        .search_events(&instance_filter(h.endpoint.id, "b2"))
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let endpoint = EndpointStore::new(&h.db).get(h.endpoint.id).await.unwrap();
    assert_eq!(endpoint.tunnel_count, 1);
    assert_eq!(h.fleet.count_recycled(h.endpoint.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_recycled_purges_its_history() {
    let h = harness().await;
    let _feed = populate(&h).await;
    let tunnels = TunnelStore::new(&h.db);
    let a1 = tunnels.find(h.endpoint.id, "a1").await.unwrap().unwrap();

    h.fleet.delete_tunnel(a1.id, true).await.unwrap();
    let page = h
        .fleet
        .search_events(&instance_filter(h.endpoint.id, "a1"))
        .await
        .unwrap();
    assert_eq!(page.total, 2, "recycling keeps the history");

    let recycled = h.fleet.list_recycled(h.endpoint.id).await.unwrap();
    assert_eq!(recycled.len(), 1);

    let err = h
        .fleet
        .delete_recycled(h.endpoint.id + 1, recycled[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Store(StoreError::RecycleNotFound(_))));

    h.fleet
        .delete_recycled(h.endpoint.id, recycled[0].id)
        .await
        .unwrap();
    assert_eq!(h.fleet.count_recycled(h.endpoint.id).await.unwrap(), 0);

    let page = h
        .fleet
        .search_events(&instance_filter(h.endpoint.id, "a1"))
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert!(h
        .fleet
        .read_file_logs(h.endpoint.id, Some("a1"), 3, 1000)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_clear_recycle_bin() {
    let h = harness().await;
    let _feed = populate(&h).await;
    h.fleet.disconnect(h.endpoint.id).await;

    let tunnels = TunnelStore::new(&h.db);
    for id in ["a1", "b2"] {
        let row = tunnels.find(h.endpoint.id, id).await.unwrap().unwrap();
        h.fleet.delete_tunnel(row.id, true).await.unwrap();
    }

    let all = h.fleet.list_all_recycled().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].endpoint_name.as_deref(), Some("edge-1"));

    let removed = h.fleet.clear_recycle_bin().await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(RecycleStore::new(&h.db).count(h.endpoint.id).await.unwrap(), 0);

    let page = h
        .fleet
        .search_events(&JournalFilter::new(h.endpoint.id))
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_endpoint_stats() {
    let h = harness().await;
    let _feed = populate(&h).await;
    let stats = h.fleet.endpoint_stats(h.endpoint.id).await.unwrap();
    assert_eq!(stats.tunnel_count, 2);
    assert_eq!(stats.traffic.tcp_rx, 20);
    assert_eq!(stats.tcp_total, 20);
    assert_eq!(stats.udp_total, 10);
    assert!(stats.log_files >= 2);
    assert!(stats.log_bytes > 0);
}

#[tokio::test]
async fn test_cleanup_logs_keeps_recent_partitions() {
    let h = harness().await;
    let _feed = populate(&h).await;

    let removed = h.fleet.cleanup_logs().await.unwrap();
    assert_eq!(removed, 0);
    let lines = h
        .fleet
        .read_file_logs(h.endpoint.id, Some("a1"), 1, 10)
        .await
        .unwrap();
    assert_eq!(lines.len(), 2);
}
