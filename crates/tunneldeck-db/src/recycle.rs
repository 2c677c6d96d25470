//! Recycle bin for removed tunnels

use crate::entities::{endpoint, tunnel, tunnel_recycle};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

pub struct RecycleStore<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> RecycleStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Keep a copy of `row` in the recycle bin
    pub async fn recycle(
        &self,
        row: &tunnel::Model,
        now: DateTime<Utc>,
    ) -> Result<tunnel_recycle::Model> {
        let copy = tunnel_recycle::ActiveModel {
            endpoint_id: Set(row.endpoint_id),
            instance_id: Set(row.instance_id.clone()),
            name: Set(row.name.clone()),
            mode: Set(row.mode.clone()),
            tunnel_address: Set(row.tunnel_address.clone()),
            tunnel_port: Set(row.tunnel_port),
            target_address: Set(row.target_address.clone()),
            target_port: Set(row.target_port),
            tls_mode: Set(row.tls_mode.clone()),
            cert_path: Set(row.cert_path.clone()),
            key_path: Set(row.key_path.clone()),
            log_level: Set(row.log_level.clone()),
            command_line: Set(row.command_line.clone()),
            password: Set(row.password.clone()),
            min: Set(row.min),
            max: Set(row.max),
            tcp_rx: Set(row.tcp_rx),
            tcp_tx: Set(row.tcp_tx),
            udp_rx: Set(row.udp_rx),
            udp_tx: Set(row.udp_tx),
            restart: Set(row.restart),
            status: Set(row.status.clone()),
            created_at: Set(row.created_at),
            deleted_at: Set(now),
            ..Default::default()
        };
        Ok(copy.insert(self.conn).await?)
    }

    pub async fn get(&self, id: i64) -> Result<tunnel_recycle::Model> {
        tunnel_recycle::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .ok_or(StoreError::RecycleNotFound(id))
    }

    /// Recycled tunnels of one endpoint, most recently removed first
    pub async fn list(&self, endpoint_id: i64) -> Result<Vec<tunnel_recycle::Model>> {
        Ok(tunnel_recycle::Entity::find()
            .filter(tunnel_recycle::Column::EndpointId.eq(endpoint_id))
            .order_by_desc(tunnel_recycle::Column::DeletedAt)
            .order_by_desc(tunnel_recycle::Column::Id)
            .all(self.conn)
            .await?)
    }

    /// Every recycled tunnel together with its endpoint
    pub async fn list_all(
        &self,
    ) -> Result<Vec<(tunnel_recycle::Model, Option<endpoint::Model>)>> {
        Ok(tunnel_recycle::Entity::find()
            .find_also_related(endpoint::Entity)
            .order_by_desc(tunnel_recycle::Column::DeletedAt)
            .order_by_desc(tunnel_recycle::Column::Id)
            .all(self.conn)
            .await?)
    }

    pub async fn count(&self, endpoint_id: i64) -> Result<u64> {
        Ok(tunnel_recycle::Entity::find()
            .filter(tunnel_recycle::Column::EndpointId.eq(endpoint_id))
            .count(self.conn)
            .await?)
    }

    pub async fn instance_ids(&self, endpoint_id: i64) -> Result<Vec<String>> {
        Ok(tunnel_recycle::Entity::find()
            .select_only()
            .column(tunnel_recycle::Column::InstanceId)
            .filter(tunnel_recycle::Column::EndpointId.eq(endpoint_id))
            .into_tuple::<String>()
            .all(self.conn)
            .await?)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = tunnel_recycle::Entity::delete_by_id(id)
            .exec(self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::RecycleNotFound(id));
        }
        Ok(())
    }

    pub async fn delete_for_endpoint(&self, endpoint_id: i64) -> Result<u64> {
        let result = tunnel_recycle::Entity::delete_many()
            .filter(tunnel_recycle::Column::EndpointId.eq(endpoint_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
