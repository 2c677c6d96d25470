//! Recycled tunnel entity: retained copy of a removed tunnel

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnel_recycle")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub endpoint_id: i64,
    pub instance_id: String,
    pub name: String,
    pub mode: String,
    pub tunnel_address: String,
    pub tunnel_port: i32,
    pub target_address: String,
    pub target_port: i32,
    pub tls_mode: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub log_level: String,
    #[sea_orm(column_type = "Text")]
    pub command_line: String,
    pub password: String,
    pub min: Option<i32>,
    pub max: Option<i32>,
    pub tcp_rx: i64,
    pub tcp_tx: i64,
    pub udp_rx: i64,
    pub udp_tx: i64,
    pub restart: bool,
    pub status: String,

    /// Creation time of the original tunnel row
    pub created_at: ChronoDateTimeUtc,

    /// When the tunnel was moved to the recycle bin
    pub deleted_at: ChronoDateTimeUtc,
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
