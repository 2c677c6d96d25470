//! Tunnel entity: materialized state of one remote tunnel instance

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub endpoint_id: i64,

    /// Identifier assigned by the remote agent, unique per endpoint
    pub instance_id: String,

    pub name: String,

    /// "server" or "client"
    pub mode: String,

    pub tunnel_address: String,
    pub tunnel_port: i32,
    pub target_address: String,
    pub target_port: i32,

    /// "inherit", "mode0", "mode1" or "mode2"
    pub tls_mode: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub log_level: String,

    /// Raw instance URL as reported by the agent
    #[sea_orm(column_type = "Text")]
    pub command_line: String,
    pub password: String,

    pub min: Option<i32>,
    pub max: Option<i32>,

    // Absolute traffic counters, the remote side is the counter of record
    pub tcp_rx: i64,
    pub tcp_tx: i64,
    pub udp_rx: i64,
    pub udp_tx: i64,

    pub restart: bool,
    pub status: String,

    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::endpoint::Entity",
        from = "Column::EndpointId",
        to = "super::endpoint::Column::Id",
        on_delete = "Cascade"
    )]
    Endpoint,
}

impl Related<super::endpoint::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Endpoint.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
