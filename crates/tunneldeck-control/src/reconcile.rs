//! Snapshot-driven repair of the materialized tunnel state
//!
//! A pass fetches the full instance list from the agent, then applies it in
//! one transaction under the endpoint's write lock: every reported instance
//! is upserted, every unreported row is deleted and the cached tunnel count
//! is recomputed. The fetch happens before the lock is taken.

use crate::error::ReconcileError;
use crate::locks::EndpointLocks;
use crate::materialize::{apply_instance, ApplyOutcome};
use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use tunneldeck_agent_client::{AgentApi, AgentTarget};
use tunneldeck_db::entities::endpoint;
use tunneldeck_db::{EndpointStore, TunnelStore};
use tunneldeck_proto::RemoteInstance;

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub endpoint_id: i64,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Instance ids of the rows deleted because the agent no longer reports them
    pub removed: Vec<String>,
    pub tunnel_count: i32,
}

impl ReconcileReport {
    /// Whether the pass changed anything
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.removed.is_empty()
    }
}

pub struct Reconciler {
    db: DatabaseConnection,
    agent: Arc<dyn AgentApi>,
    locks: Arc<EndpointLocks>,
}

impl Reconciler {
    pub fn new(
        db: DatabaseConnection,
        agent: Arc<dyn AgentApi>,
        locks: Arc<EndpointLocks>,
    ) -> Self {
        Self { db, agent, locks }
    }

    /// Fetch the endpoint's snapshot and apply it
    pub async fn reconcile(
        &self,
        endpoint: &endpoint::Model,
    ) -> Result<ReconcileReport, ReconcileError> {
        let target = AgentTarget::new(&endpoint.url, &endpoint.api_path, &endpoint.api_key);
        let snapshot = self.agent.fetch_instances(&target).await?;
        debug!(endpoint_id = endpoint.id, count = snapshot.len(), "Fetched snapshot");
        self.apply_snapshot(endpoint.id, &snapshot).await
    }

    /// Apply a fetched snapshot atomically
    pub async fn apply_snapshot(
        &self,
        endpoint_id: i64,
        snapshot: &[RemoteInstance],
    ) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self.locks.lock(endpoint_id).await;
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let endpoints = EndpointStore::new(&txn);
        endpoints.get(endpoint_id).await?;

        let mut report = ReconcileReport {
            endpoint_id,
            ..Default::default()
        };
        let mut seen = Vec::with_capacity(snapshot.len());

        for instance in snapshot {
            match apply_instance(&txn, endpoint_id, instance, now).await? {
                ApplyOutcome::Inserted => report.inserted += 1,
                ApplyOutcome::Updated => report.updated += 1,
                ApplyOutcome::Unchanged => report.unchanged += 1,
                ApplyOutcome::Skipped => {
                    report.skipped += 1;
                    continue;
                }
            }
            seen.push(instance.id.clone());
        }

        let removed = TunnelStore::new(&txn)
            .delete_unseen(endpoint_id, &seen)
            .await?;
        report.removed = removed.into_iter().map(|row| row.instance_id).collect();
        report.tunnel_count = endpoints.recompute_tunnel_count(endpoint_id).await?;

        txn.commit().await?;

        if report.is_noop() {
            debug!(endpoint_id, "Reconciliation found no drift");
        } else {
            info!(
                endpoint_id,
                inserted = report.inserted,
                updated = report.updated,
                removed = report.removed.len(),
                tunnels = report.tunnel_count,
                "Reconciled endpoint"
            );
        }
        Ok(report)
    }
}
