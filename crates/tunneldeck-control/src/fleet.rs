//! Fleet facade: the operations the outer layers call

use crate::config::FleetConfig;
use crate::error::{ReconcileError, Result};
use crate::locks::EndpointLocks;
use crate::manager::{ConnectOutcome, ConnectionManager};
use crate::processor::EventProcessor;
use crate::reconcile::{ReconcileReport, Reconciler};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tunneldeck_agent_client::{AgentApi, AgentClientError, AgentTarget};
use tunneldeck_db::entities::endpoint;
use tunneldeck_db::{
    EndpointStatus, EndpointStore, EventJournal, JournalFilter, JournalPage, NewEndpoint,
    SystemFacts, TrafficCounters, TunnelStore,
};
use tunneldeck_filelog::{FileLogStore, LogEntry};
use tunneldeck_proto::SystemInfo;

/// How to reach an endpoint's agent
pub fn agent_target(endpoint: &endpoint::Model) -> AgentTarget {
    AgentTarget::new(&endpoint.url, &endpoint.api_path, &endpoint.api_key)
}

/// System facts after a refresh attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfoRefresh {
    pub facts: SystemFacts,
    /// False when the agent could not be queried and stored facts were returned
    pub fresh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub endpoint_id: i64,
    pub tunnel_count: usize,
    pub traffic: TrafficCounters,
    pub tcp_total: i64,
    pub udp_total: i64,
    pub log_files: u64,
    pub log_bytes: u64,
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn facts_from_info(info: SystemInfo) -> SystemFacts {
    SystemFacts {
        os: non_empty(info.os),
        arch: non_empty(info.arch),
        ver: non_empty(info.ver),
        log: non_empty(info.log),
        tls: non_empty(info.tls),
        crt: non_empty(info.crt),
        key_path: non_empty(info.key),
        uptime: info.uptime,
    }
}

pub struct Fleet {
    pub(crate) db: DatabaseConnection,
    pub(crate) agent: Arc<dyn AgentApi>,
    pub(crate) file_logs: Arc<FileLogStore>,
    pub(crate) locks: Arc<EndpointLocks>,
    pub(crate) manager: ConnectionManager,
    pub(crate) reconciler: Reconciler,
    pub(crate) config: FleetConfig,
}

impl Fleet {
    pub fn new(db: DatabaseConnection, agent: Arc<dyn AgentApi>, config: FleetConfig) -> Self {
        let file_logs = Arc::new(FileLogStore::new(config.log_dir.clone()));
        let locks = Arc::new(EndpointLocks::new());
        let processor = Arc::new(EventProcessor::new(
            db.clone(),
            file_logs.clone(),
            locks.clone(),
            config.recycle_on_delete,
        ));
        let manager = ConnectionManager::new(
            db.clone(),
            agent.clone(),
            processor,
            locks.clone(),
            config.connect_timeout,
            config.max_frame_bytes,
        );
        let reconciler = Reconciler::new(db.clone(), agent.clone(), locks.clone());

        Self {
            db,
            agent,
            file_logs,
            locks,
            manager,
            reconciler,
            config,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn file_logs(&self) -> &FileLogStore {
        &self.file_logs
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn add_endpoint(&self, new: NewEndpoint) -> Result<endpoint::Model> {
        let model = EndpointStore::new(&self.db).create(new).await?;
        info!(endpoint_id = model.id, name = %model.name, "Endpoint registered");
        Ok(model)
    }

    pub async fn list_endpoints(&self) -> Result<Vec<endpoint::Model>> {
        Ok(EndpointStore::new(&self.db).list().await?)
    }

    pub async fn rename_endpoint(&self, endpoint_id: i64, name: &str) -> Result<endpoint::Model> {
        Ok(EndpointStore::new(&self.db).rename(endpoint_id, name).await?)
    }

    pub async fn connect_endpoint(&self, endpoint_id: i64) -> Result<ConnectOutcome> {
        let endpoint = EndpointStore::new(&self.db).get(endpoint_id).await?;
        self.manager
            .connect(endpoint_id, agent_target(&endpoint))
            .await
    }

    /// Open a session for every stored endpoint. Failures are per endpoint.
    pub async fn connect_all(&self) -> Result<Vec<(i64, Result<ConnectOutcome>)>> {
        let endpoints = EndpointStore::new(&self.db).list().await?;
        let attempts = endpoints.iter().map(|endpoint| async move {
            let outcome = self
                .manager
                .connect(endpoint.id, agent_target(endpoint))
                .await;
            (endpoint.id, outcome)
        });
        Ok(futures::future::join_all(attempts).await)
    }

    pub async fn disconnect(&self, endpoint_id: i64) -> bool {
        self.manager.disconnect(endpoint_id).await
    }

    /// Manual reconnect: tear down, probe, then open a new session
    pub async fn reconnect(&self, endpoint_id: i64) -> Result<ConnectOutcome> {
        self.manager.disconnect(endpoint_id).await;

        let endpoint = EndpointStore::new(&self.db).get(endpoint_id).await?;
        let target = agent_target(&endpoint);
        if let Err(e) = self.probe(&target).await {
            let status = if e.is_transport() {
                EndpointStatus::Offline
            } else {
                EndpointStatus::Error
            };
            let _guard = self.locks.lock(endpoint_id).await;
            if !self.manager.is_connected(endpoint_id) {
                EndpointStore::new(&self.db)
                    .set_status(endpoint_id, status)
                    .await?;
            }
            return Err(e.into());
        }

        self.manager.connect(endpoint_id, target).await
    }

    /// Check that an agent's event feed answers within the probe timeout
    pub async fn probe(&self, target: &AgentTarget) -> Result<(), AgentClientError> {
        self.agent.probe(target, self.config.probe_timeout).await
    }

    /// Reconcile one endpoint against a fresh snapshot
    pub async fn refresh_tunnels(&self, endpoint_id: i64) -> Result<ReconcileReport> {
        let endpoint = EndpointStore::new(&self.db).get(endpoint_id).await?;
        Ok(self.reconciler.reconcile(&endpoint).await?)
    }

    /// Reconcile every endpoint, one after the other
    pub async fn reconcile_all(
        &self,
    ) -> Result<Vec<(i64, Result<ReconcileReport, ReconcileError>)>> {
        let endpoints = EndpointStore::new(&self.db).list().await?;
        let mut results = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            let result = self.reconciler.reconcile(endpoint).await;
            if let Err(e) = &result {
                warn!(endpoint_id = endpoint.id, "Reconciliation failed: {}", e);
            }
            results.push((endpoint.id, result));
        }
        Ok(results)
    }

    /// Fetch and persist system facts, falling back to the stored ones
    pub async fn refresh_system_info(&self, endpoint_id: i64) -> Result<SystemInfoRefresh> {
        let endpoints = EndpointStore::new(&self.db);
        let endpoint = endpoints.get(endpoint_id).await?;

        match self.agent.fetch_info(&agent_target(&endpoint)).await {
            Ok(info) => {
                let facts = facts_from_info(info);
                endpoints.update_system_info(endpoint_id, &facts).await?;
                debug!(endpoint_id, "System info refreshed");
                Ok(SystemInfoRefresh { facts, fresh: true })
            }
            Err(e) => {
                warn!(endpoint_id, "Failed to fetch system info, using stored values: {}", e);
                let mut facts = SystemFacts::from_model(&endpoint);
                facts.uptime = facts.uptime.filter(|uptime| *uptime > 0);
                Ok(SystemInfoRefresh {
                    facts,
                    fresh: false,
                })
            }
        }
    }

    pub async fn endpoint_stats(&self, endpoint_id: i64) -> Result<EndpointStats> {
        EndpointStore::new(&self.db).get(endpoint_id).await?;
        let tunnels = TunnelStore::new(&self.db);
        let tunnel_count = tunnels.list_for_endpoint(endpoint_id).await?.len();
        let traffic = tunnels.traffic_totals(endpoint_id).await?;
        let logs = self.file_logs.endpoint_stats(endpoint_id).await?;

        Ok(EndpointStats {
            endpoint_id,
            tunnel_count,
            traffic,
            tcp_total: traffic.tcp_total(),
            udp_total: traffic.udp_total(),
            log_files: logs.files,
            log_bytes: logs.bytes,
        })
    }

    pub async fn search_events(&self, filter: &JournalFilter) -> Result<JournalPage> {
        Ok(EventJournal::new(&self.db).search(filter).await?)
    }

    pub async fn read_file_logs(
        &self,
        endpoint_id: i64,
        instance_id: Option<&str>,
        days: u32,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        Ok(self
            .file_logs
            .read_recent(endpoint_id, instance_id, days, limit)
            .await?)
    }

    /// Drop file-log partitions older than the retention window
    pub async fn cleanup_logs(&self) -> Result<usize> {
        let removed = self
            .file_logs
            .cleanup_expired(self.config.log_retention_days)
            .await?;
        Ok(removed)
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        let stopped = self.manager.disconnect_all().await;
        info!(sessions = stopped, "Fleet shut down");
    }
}
