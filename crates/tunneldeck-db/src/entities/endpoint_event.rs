//! Event journal entity: one ingested stream event, never updated

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "endpoint_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub endpoint_id: i64,

    /// Remote instance, absent for endpoint-scoped events
    pub instance_id: Option<String>,

    /// Event kind ("update", "log", "delete", ...)
    pub event_type: String,

    /// Log text, or the raw payload when the event carries no log line
    #[sea_orm(column_type = "Text", nullable)]
    pub logs: Option<String>,

    /// Timestamp reported by the agent
    pub event_time: Option<ChronoDateTimeUtc>,

    /// Ingestion time
    pub created_at: ChronoDateTimeUtc,
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
