//! Endpoint entity: one remote tunnel agent under management

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum EndpointStatus {
    /// Created, no connection attempted yet
    #[sea_orm(string_value = "INITIALIZING")]
    Initializing,

    /// Event stream open
    #[sea_orm(string_value = "ONLINE")]
    Online,

    /// Unreachable or stream dropped
    #[sea_orm(string_value = "OFFLINE")]
    Offline,

    /// Remote answered but rejected the session or sent garbage
    #[sea_orm(string_value = "ERROR")]
    Error,

    /// Session stopped on request
    #[sea_orm(string_value = "DISCONNECTED")]
    Disconnected,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Error => "ERROR",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "endpoints")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Display name
    pub name: String,

    /// Base URL of the agent (scheme, host, port)
    pub url: String,

    /// API prefix appended to the base URL, e.g. `/api`
    pub api_path: String,

    pub api_key: String,

    pub color: Option<String>,

    // System facts reported by the agent
    pub os: Option<String>,
    pub arch: Option<String>,
    pub ver: Option<String>,
    pub log: Option<String>,
    pub tls: Option<String>,
    pub crt: Option<String>,
    pub key_path: Option<String>,
    pub uptime: Option<i64>,

    pub status: EndpointStatus,

    /// Cached number of tunnel rows, recomputed on reconciliation
    pub tunnel_count: i32,

    /// Last successful system-info refresh
    pub last_check: Option<ChronoDateTimeUtc>,

    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tunnel::Entity")]
    Tunnel,

    #[sea_orm(has_many = "super::tunnel_recycle::Entity")]
    TunnelRecycle,

    #[sea_orm(has_many = "super::endpoint_event::Entity")]
    EndpointEvent,
}

impl Related<super::tunnel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tunnel.def()
    }
}

impl Related<super::tunnel_recycle::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TunnelRecycle.def()
    }
}

impl Related<super::endpoint_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EndpointEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
