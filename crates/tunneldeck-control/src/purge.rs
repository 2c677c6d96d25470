//! Deletion cascades and the recycle bin
//!
//! Removing an endpoint, a tunnel or a recycle-bin entry also removes what
//! was recorded about it: journal rows in the same transaction as the row
//! itself, file-log partitions right after the commit.

use crate::error::Result;
use crate::fleet::Fleet;
use chrono::Utc;
use sea_orm::TransactionTrait;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use tunneldeck_db::entities::tunnel_recycle;
use tunneldeck_db::{EndpointStore, EventJournal, RecycleStore, StoreError, TunnelStore};

/// What an endpoint deletion removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointPurge {
    pub endpoint_id: i64,
    pub tunnels: u64,
    pub recycled: u64,
    pub events: u64,
    /// Every instance id the endpoint had, live or recycled
    pub instances: Vec<String>,
}

/// A recycle-bin entry with the name of its endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RecycledTunnel {
    #[serde(flatten)]
    pub tunnel: tunnel_recycle::Model,
    pub endpoint_name: Option<String>,
}

impl Fleet {
    /// Remove an endpoint with its tunnels, recycle bin, journal and file logs
    pub async fn delete_endpoint(&self, endpoint_id: i64) -> Result<EndpointPurge> {
        self.manager.disconnect(endpoint_id).await;

        let purge = {
            let _guard = self.locks.lock(endpoint_id).await;
            let txn = self.db.begin().await?;
            let endpoints = EndpointStore::new(&txn);
            endpoints.get(endpoint_id).await?;

            let tunnels = TunnelStore::new(&txn);
            let recycle = RecycleStore::new(&txn);
            let mut instances = tunnels.instance_ids(endpoint_id).await?;
            instances.extend(recycle.instance_ids(endpoint_id).await?);
            instances.sort();
            instances.dedup();

            let purge = EndpointPurge {
                endpoint_id,
                tunnels: tunnels.delete_for_endpoint(endpoint_id).await?,
                recycled: recycle.delete_for_endpoint(endpoint_id).await?,
                events: EventJournal::new(&txn)
                    .delete_for_endpoint(endpoint_id)
                    .await?,
                instances,
            };
            endpoints.delete(endpoint_id).await?;
            txn.commit().await?;
            purge
        };

        self.file_logs.clear_endpoint(endpoint_id).await?;
        self.locks.forget(endpoint_id);

        info!(
            endpoint_id,
            tunnels = purge.tunnels,
            recycled = purge.recycled,
            events = purge.events,
            "Endpoint deleted"
        );
        Ok(purge)
    }

    /// Remove a live tunnel.
    ///
    /// With `recycle` a copy goes to the recycle bin and the tunnel's logs are
    /// kept until that copy is deleted. Without it the logs go immediately.
    pub async fn delete_tunnel(&self, tunnel_id: i64, recycle: bool) -> Result<()> {
        let endpoint_id = TunnelStore::new(&self.db).get(tunnel_id).await?.endpoint_id;

        let instance_id = {
            let _guard = self.locks.lock(endpoint_id).await;
            let txn = self.db.begin().await?;
            let tunnels = TunnelStore::new(&txn);
            let row = tunnels.get(tunnel_id).await?;

            if recycle {
                RecycleStore::new(&txn).recycle(&row, Utc::now()).await?;
            } else {
                EventJournal::new(&txn)
                    .delete_for_instance(endpoint_id, &row.instance_id)
                    .await?;
            }
            tunnels.delete(row.id).await?;
            EndpointStore::new(&txn)
                .recompute_tunnel_count(endpoint_id)
                .await?;
            txn.commit().await?;
            row.instance_id
        };

        if !recycle {
            self.file_logs
                .clear(endpoint_id, Some(&instance_id))
                .await?;
        }

        info!(endpoint_id, instance_id = %instance_id, recycle, "Tunnel deleted");
        Ok(())
    }

    pub async fn list_recycled(&self, endpoint_id: i64) -> Result<Vec<tunnel_recycle::Model>> {
        Ok(RecycleStore::new(&self.db).list(endpoint_id).await?)
    }

    pub async fn list_all_recycled(&self) -> Result<Vec<RecycledTunnel>> {
        let rows = RecycleStore::new(&self.db).list_all().await?;
        Ok(rows
            .into_iter()
            .map(|(tunnel, endpoint)| RecycledTunnel {
                tunnel,
                endpoint_name: endpoint.map(|endpoint| endpoint.name),
            })
            .collect())
    }

    pub async fn count_recycled(&self, endpoint_id: i64) -> Result<u64> {
        Ok(RecycleStore::new(&self.db).count(endpoint_id).await?)
    }

    /// Permanently delete one recycle-bin entry and its recorded history
    pub async fn delete_recycled(&self, endpoint_id: i64, recycle_id: i64) -> Result<()> {
        let instance_id = {
            let _guard = self.locks.lock(endpoint_id).await;
            let txn = self.db.begin().await?;
            let recycle = RecycleStore::new(&txn);
            let row = recycle.get(recycle_id).await?;
            if row.endpoint_id != endpoint_id {
                return Err(StoreError::RecycleNotFound(recycle_id).into());
            }

            recycle.delete(row.id).await?;
            EventJournal::new(&txn)
                .delete_for_instance(endpoint_id, &row.instance_id)
                .await?;
            txn.commit().await?;
            row.instance_id
        };

        self.file_logs
            .clear(endpoint_id, Some(&instance_id))
            .await?;
        info!(endpoint_id, instance_id = %instance_id, "Recycled tunnel purged");
        Ok(())
    }

    /// Empty the recycle bin of every endpoint. Returns the number of entries removed.
    pub async fn clear_recycle_bin(&self) -> Result<usize> {
        let mut by_endpoint: BTreeMap<i64, Vec<tunnel_recycle::Model>> = BTreeMap::new();
        for (row, _) in RecycleStore::new(&self.db).list_all().await? {
            by_endpoint.entry(row.endpoint_id).or_default().push(row);
        }

        let mut removed = 0;
        for (endpoint_id, rows) in by_endpoint {
            {
                let _guard = self.locks.lock(endpoint_id).await;
                let txn = self.db.begin().await?;
                let recycle = RecycleStore::new(&txn);
                let journal = EventJournal::new(&txn);
                for row in &rows {
                    recycle.delete(row.id).await?;
                    journal
                        .delete_for_instance(endpoint_id, &row.instance_id)
                        .await?;
                }
                txn.commit().await?;
            }

            for row in &rows {
                if let Err(e) = self
                    .file_logs
                    .clear(endpoint_id, Some(&row.instance_id))
                    .await
                {
                    warn!(endpoint_id, instance_id = %row.instance_id, "Failed to clear file logs: {}", e);
                }
            }
            removed += rows.len();
        }

        info!(removed, "Recycle bin cleared");
        Ok(removed)
    }
}
