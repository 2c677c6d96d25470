//! Event processor: turns decoded stream events into journal records, file
//! log lines and tunnel row mutations.

use crate::error::ControlError;
use crate::locks::EndpointLocks;
use crate::materialize::{apply_instance, reported_counters, ApplyOutcome};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tunneldeck_db::{
    EndpointStatus, EndpointStore, EventJournal, NewEvent, RecycleStore, TrafficCounters,
    TunnelStore,
};
use tunneldeck_filelog::FileLogStore;
use tunneldeck_proto::{EventKind, StreamEvent};

/// Receiver of decoded events, one call per event in arrival order
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, endpoint_id: i64, event: StreamEvent) -> Result<(), ControlError>;
}

pub struct EventProcessor {
    db: DatabaseConnection,
    file_logs: Arc<FileLogStore>,
    locks: Arc<EndpointLocks>,
    recycle_on_delete: bool,
}

impl EventProcessor {
    pub fn new(
        db: DatabaseConnection,
        file_logs: Arc<FileLogStore>,
        locks: Arc<EndpointLocks>,
        recycle_on_delete: bool,
    ) -> Self {
        Self {
            db,
            file_logs,
            locks,
            recycle_on_delete,
        }
    }

    async fn journal(&self, endpoint_id: i64, event: &StreamEvent) -> Result<(), ControlError> {
        EventJournal::new(&self.db)
            .append(NewEvent {
                endpoint_id,
                instance_id: event.instance_id().map(str::to_string),
                event_type: event.kind.as_str().to_string(),
                logs: Some(event.journal_text()),
                event_time: event.event_time(),
            })
            .await?;
        Ok(())
    }

    async fn apply(&self, endpoint_id: i64, event: &StreamEvent) -> Result<(), ControlError> {
        let is_stateful = match &event.kind {
            EventKind::Shutdown => true,
            kind if kind.is_lifecycle() => event.instance.is_some(),
            EventKind::Log | EventKind::Deleted => event.instance.is_some(),
            _ => false,
        };
        if !is_stateful {
            return Ok(());
        }

        let _guard = self.locks.lock(endpoint_id).await;
        let now = Utc::now();

        match (&event.kind, &event.instance) {
            (EventKind::Shutdown, _) => {
                info!(endpoint_id, "Agent reported shutdown");
                EndpointStore::new(&self.db)
                    .set_status(endpoint_id, EndpointStatus::Offline)
                    .await?;
            }
            (kind, Some(instance)) if kind.is_lifecycle() => {
                let outcome = apply_instance(&self.db, endpoint_id, instance, now).await?;
                debug!(endpoint_id, instance_id = %instance.id, ?outcome, "Applied instance event");
                if outcome == ApplyOutcome::Inserted {
                    EndpointStore::new(&self.db)
                        .recompute_tunnel_count(endpoint_id)
                        .await?;
                }
            }
            (EventKind::Log, Some(instance)) => {
                let store = TunnelStore::new(&self.db);
                if let Some(row) = store.find(endpoint_id, &instance.id).await? {
                    let status = Some(instance.status.as_str());
                    let counters =
                        TrafficCounters::from_model(&row).merge(&reported_counters(instance));
                    store.update_counters(row, counters, status, now).await?;
                }
            }
            (EventKind::Deleted, Some(instance)) => {
                let txn = self.db.begin().await?;
                let tunnels = TunnelStore::new(&txn);
                let removed = tunnels.find(endpoint_id, &instance.id).await?;
                if let Some(row) = &removed {
                    // Recycled rows keep their history until the bin entry is deleted
                    if self.recycle_on_delete {
                        RecycleStore::new(&txn).recycle(row, now).await?;
                    } else {
                        EventJournal::new(&txn)
                            .delete_for_instance(endpoint_id, &row.instance_id)
                            .await?;
                    }
                    tunnels.delete(row.id).await?;
                    EndpointStore::new(&txn)
                        .recompute_tunnel_count(endpoint_id)
                        .await?;
                    info!(
                        endpoint_id,
                        instance_id = %instance.id,
                        recycled = self.recycle_on_delete,
                        "Tunnel removed by agent"
                    );
                }
                txn.commit().await?;

                if removed.is_some() && !self.recycle_on_delete {
                    self.file_logs.clear(endpoint_id, Some(&instance.id)).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl EventSink for EventProcessor {
    /// Every step is attempted; the first failure is reported.
    async fn handle(&self, endpoint_id: i64, event: StreamEvent) -> Result<(), ControlError> {
        let journaled = self.journal(endpoint_id, &event).await;
        if let Err(e) = &journaled {
            warn!(endpoint_id, kind = %event.kind, "Failed to journal event: {}", e);
        }

        let logged = self
            .file_logs
            .append(endpoint_id, event.instance_id(), &event.rendered_line())
            .await
            .map_err(ControlError::from);
        if let Err(e) = &logged {
            warn!(endpoint_id, kind = %event.kind, "Failed to write file log: {}", e);
        }

        let applied = self.apply(endpoint_id, &event).await;

        journaled.and(logged).and(applied)
    }
}
