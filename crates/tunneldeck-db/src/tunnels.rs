//! Materialized tunnel state

use crate::entities::tunnel;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;

/// Mutable fields of a tunnel row, as derived from a remote report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelRecord {
    pub mode: String,
    pub tunnel_address: String,
    pub tunnel_port: i32,
    pub target_address: String,
    pub target_port: i32,
    pub tls_mode: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub log_level: String,
    pub command_line: String,
    pub password: String,
    pub min: Option<i32>,
    pub max: Option<i32>,
    pub counters: TrafficCounters,
    pub restart: bool,
    pub status: String,
}

impl TunnelRecord {
    fn matches(&self, model: &tunnel::Model) -> bool {
        self.mode == model.mode
            && self.tunnel_address == model.tunnel_address
            && self.tunnel_port == model.tunnel_port
            && self.target_address == model.target_address
            && self.target_port == model.target_port
            && self.tls_mode == model.tls_mode
            && self.cert_path == model.cert_path
            && self.key_path == model.key_path
            && self.log_level == model.log_level
            && self.command_line == model.command_line
            && self.password == model.password
            && self.min == model.min
            && self.max == model.max
            && self.counters == TrafficCounters::from_model(model)
            && self.restart == model.restart
            && self.status == model.status
    }

    fn write(&self, active: &mut tunnel::ActiveModel) {
        active.mode = Set(self.mode.clone());
        active.tunnel_address = Set(self.tunnel_address.clone());
        active.tunnel_port = Set(self.tunnel_port);
        active.target_address = Set(self.target_address.clone());
        active.target_port = Set(self.target_port);
        active.tls_mode = Set(self.tls_mode.clone());
        active.cert_path = Set(self.cert_path.clone());
        active.key_path = Set(self.key_path.clone());
        active.log_level = Set(self.log_level.clone());
        active.command_line = Set(self.command_line.clone());
        active.password = Set(self.password.clone());
        active.min = Set(self.min);
        active.max = Set(self.max);
        self.counters.write(active);
        active.restart = Set(self.restart);
        active.status = Set(self.status.clone());
    }
}

/// Absolute traffic counters of one tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub tcp_rx: i64,
    pub tcp_tx: i64,
    pub udp_rx: i64,
    pub udp_tx: i64,
}

impl TrafficCounters {
    pub fn from_model(model: &tunnel::Model) -> Self {
        Self {
            tcp_rx: model.tcp_rx,
            tcp_tx: model.tcp_tx,
            udp_rx: model.udp_rx,
            udp_tx: model.udp_tx,
        }
    }

    fn write(&self, active: &mut tunnel::ActiveModel) {
        active.tcp_rx = Set(self.tcp_rx);
        active.tcp_tx = Set(self.tcp_tx);
        active.udp_rx = Set(self.udp_rx);
        active.udp_tx = Set(self.udp_tx);
    }

    /// Replace only the counters a report carries
    pub fn merge(self, reported: &ReportedCounters) -> Self {
        Self {
            tcp_rx: reported.tcp_rx.unwrap_or(self.tcp_rx),
            tcp_tx: reported.tcp_tx.unwrap_or(self.tcp_tx),
            udp_rx: reported.udp_rx.unwrap_or(self.udp_rx),
            udp_tx: reported.udp_tx.unwrap_or(self.udp_tx),
        }
    }

    pub fn tcp_total(&self) -> i64 {
        self.tcp_rx.saturating_add(self.tcp_tx)
    }

    pub fn udp_total(&self) -> i64 {
        self.udp_rx.saturating_add(self.udp_tx)
    }

    fn accumulate(&mut self, other: &Self) {
        self.tcp_rx = self.tcp_rx.saturating_add(other.tcp_rx);
        self.tcp_tx = self.tcp_tx.saturating_add(other.tcp_tx);
        self.udp_rx = self.udp_rx.saturating_add(other.udp_rx);
        self.udp_tx = self.udp_tx.saturating_add(other.udp_tx);
    }
}

/// Counters carried by one remote report; absent fields were not reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportedCounters {
    pub tcp_rx: Option<i64>,
    pub tcp_tx: Option<i64>,
    pub udp_rx: Option<i64>,
    pub udp_tx: Option<i64>,
}

/// Tunnel access over any connection or transaction
pub struct TunnelStore<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> TunnelStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn get(&self, id: i64) -> Result<tunnel::Model> {
        tunnel::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .ok_or(StoreError::TunnelNotFound(id))
    }

    pub async fn find(&self, endpoint_id: i64, instance_id: &str) -> Result<Option<tunnel::Model>> {
        Ok(tunnel::Entity::find()
            .filter(tunnel::Column::EndpointId.eq(endpoint_id))
            .filter(tunnel::Column::InstanceId.eq(instance_id))
            .one(self.conn)
            .await?)
    }

    pub async fn list_for_endpoint(&self, endpoint_id: i64) -> Result<Vec<tunnel::Model>> {
        Ok(tunnel::Entity::find()
            .filter(tunnel::Column::EndpointId.eq(endpoint_id))
            .order_by_asc(tunnel::Column::Id)
            .all(self.conn)
            .await?)
    }

    pub async fn instance_ids(&self, endpoint_id: i64) -> Result<Vec<String>> {
        Ok(tunnel::Entity::find()
            .select_only()
            .column(tunnel::Column::InstanceId)
            .filter(tunnel::Column::EndpointId.eq(endpoint_id))
            .into_tuple::<String>()
            .all(self.conn)
            .await?)
    }

    pub async fn insert(
        &self,
        endpoint_id: i64,
        instance_id: &str,
        name: &str,
        record: &TunnelRecord,
        now: DateTime<Utc>,
    ) -> Result<tunnel::Model> {
        let mut active = tunnel::ActiveModel {
            endpoint_id: Set(endpoint_id),
            instance_id: Set(instance_id.to_string()),
            name: Set(name.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        record.write(&mut active);

        active
            .insert(self.conn)
            .await
            .map_err(|e| StoreError::on_insert(e, endpoint_id, instance_id))
    }

    /// Apply `record` (and an optional new name) to an existing row.
    ///
    /// Returns `None` without touching the row when nothing would change.
    pub async fn update(
        &self,
        current: tunnel::Model,
        name: Option<&str>,
        record: &TunnelRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<tunnel::Model>> {
        let rename = name.filter(|name| *name != current.name);
        if rename.is_none() && record.matches(&current) {
            return Ok(None);
        }

        let mut active: tunnel::ActiveModel = current.into();
        if let Some(name) = rename {
            active.name = Set(name.to_string());
        }
        record.write(&mut active);
        active.updated_at = Set(now);
        Ok(Some(active.update(self.conn).await?))
    }

    /// Replace the traffic counters (and status, when reported) of an existing row
    pub async fn update_counters(
        &self,
        current: tunnel::Model,
        counters: TrafficCounters,
        status: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let status = status.filter(|status| !status.is_empty() && *status != current.status);
        if status.is_none() && counters == TrafficCounters::from_model(&current) {
            return Ok(false);
        }

        let mut active: tunnel::ActiveModel = current.into();
        counters.write(&mut active);
        if let Some(status) = status {
            active.status = Set(status.to_string());
        }
        active.updated_at = Set(now);
        active.update(self.conn).await?;
        Ok(true)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = tunnel::Entity::delete_by_id(id).exec(self.conn).await?;
        if result.rows_affected == 0 {
            return Err(StoreError::TunnelNotFound(id));
        }
        Ok(())
    }

    /// Delete every row of the endpoint whose instance is not in `seen`.
    ///
    /// Returns the removed rows.
    pub async fn delete_unseen(
        &self,
        endpoint_id: i64,
        seen: &[String],
    ) -> Result<Vec<tunnel::Model>> {
        let stale: Vec<tunnel::Model> = self
            .list_for_endpoint(endpoint_id)
            .await?
            .into_iter()
            .filter(|row| !seen.contains(&row.instance_id))
            .collect();

        if !stale.is_empty() {
            tunnel::Entity::delete_many()
                .filter(tunnel::Column::Id.is_in(stale.iter().map(|row| row.id)))
                .exec(self.conn)
                .await?;
        }
        Ok(stale)
    }

    pub async fn delete_for_endpoint(&self, endpoint_id: i64) -> Result<u64> {
        let result = tunnel::Entity::delete_many()
            .filter(tunnel::Column::EndpointId.eq(endpoint_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Sum of traffic counters over the endpoint's tunnels
    pub async fn traffic_totals(&self, endpoint_id: i64) -> Result<TrafficCounters> {
        let mut totals = TrafficCounters::default();
        for row in self.list_for_endpoint(endpoint_id).await? {
            totals.accumulate(&TrafficCounters::from_model(&row));
        }
        Ok(totals)
    }
}
