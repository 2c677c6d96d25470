//! Endpoint records

use crate::entities::{endpoint, tunnel};
use crate::error::{Result, StoreError};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};

pub use endpoint::EndpointStatus;

/// Fields supplied when registering an endpoint
#[derive(Debug, Clone, Default)]
pub struct NewEndpoint {
    pub name: String,
    pub url: String,
    pub api_path: String,
    pub api_key: String,
    pub color: Option<String>,
}

/// System facts reported by an agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemFacts {
    pub os: Option<String>,
    pub arch: Option<String>,
    pub ver: Option<String>,
    pub log: Option<String>,
    pub tls: Option<String>,
    pub crt: Option<String>,
    pub key_path: Option<String>,
    pub uptime: Option<i64>,
}

impl SystemFacts {
    /// Facts currently stored on an endpoint row
    pub fn from_model(model: &endpoint::Model) -> Self {
        Self {
            os: model.os.clone(),
            arch: model.arch.clone(),
            ver: model.ver.clone(),
            log: model.log.clone(),
            tls: model.tls.clone(),
            crt: model.crt.clone(),
            key_path: model.key_path.clone(),
            uptime: model.uptime,
        }
    }
}

/// Endpoint access over any connection or transaction
pub struct EndpointStore<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> EndpointStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn create(&self, new: NewEndpoint) -> Result<endpoint::Model> {
        let now = Utc::now();
        let model = endpoint::ActiveModel {
            name: Set(new.name),
            url: Set(new.url.trim_end_matches('/').to_string()),
            api_path: Set(new.api_path),
            api_key: Set(new.api_key),
            color: Set(new.color),
            os: Set(None),
            arch: Set(None),
            ver: Set(None),
            log: Set(None),
            tls: Set(None),
            crt: Set(None),
            key_path: Set(None),
            uptime: Set(None),
            status: Set(EndpointStatus::Initializing),
            tunnel_count: Set(0),
            last_check: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(model.insert(self.conn).await?)
    }

    pub async fn find(&self, id: i64) -> Result<Option<endpoint::Model>> {
        Ok(endpoint::Entity::find_by_id(id).one(self.conn).await?)
    }

    pub async fn get(&self, id: i64) -> Result<endpoint::Model> {
        self.find(id)
            .await?
            .ok_or(StoreError::EndpointNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<endpoint::Model>> {
        Ok(endpoint::Entity::find()
            .order_by_asc(endpoint::Column::Id)
            .all(self.conn)
            .await?)
    }

    pub async fn set_status(&self, id: i64, status: EndpointStatus) -> Result<()> {
        let current = self.get(id).await?;
        if current.status == status {
            return Ok(());
        }

        let mut active: endpoint::ActiveModel = current.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        active.update(self.conn).await?;
        Ok(())
    }

    pub async fn rename(&self, id: i64, name: &str) -> Result<endpoint::Model> {
        let mut active: endpoint::ActiveModel = self.get(id).await?.into();
        active.name = Set(name.to_string());
        active.updated_at = Set(Utc::now());
        Ok(active.update(self.conn).await?)
    }

    pub async fn update_system_info(
        &self,
        id: i64,
        facts: &SystemFacts,
    ) -> Result<endpoint::Model> {
        let now = Utc::now();
        let mut active: endpoint::ActiveModel = self.get(id).await?.into();
        active.os = Set(facts.os.clone());
        active.arch = Set(facts.arch.clone());
        active.ver = Set(facts.ver.clone());
        active.log = Set(facts.log.clone());
        active.tls = Set(facts.tls.clone());
        active.crt = Set(facts.crt.clone());
        active.key_path = Set(facts.key_path.clone());
        active.uptime = Set(facts.uptime);
        active.last_check = Set(Some(now));
        active.updated_at = Set(now);
        Ok(active.update(self.conn).await?)
    }

    /// Recount tunnel rows and cache the result on the endpoint
    pub async fn recompute_tunnel_count(&self, id: i64) -> Result<i32> {
        let count = tunnel::Entity::find()
            .filter(tunnel::Column::EndpointId.eq(id))
            .count(self.conn)
            .await?;
        let count = i32::try_from(count).unwrap_or(i32::MAX);

        let current = self.get(id).await?;
        if current.tunnel_count != count {
            let mut active: endpoint::ActiveModel = current.into();
            active.tunnel_count = Set(count);
            active.updated_at = Set(Utc::now());
            active.update(self.conn).await?;
        }
        Ok(count)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = endpoint::Entity::delete_by_id(id).exec(self.conn).await?;
        if result.rows_affected == 0 {
            return Err(StoreError::EndpointNotFound(id));
        }
        Ok(())
    }
}
