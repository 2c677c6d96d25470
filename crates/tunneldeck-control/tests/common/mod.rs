//! Shared fixtures: an in-memory database and a scriptable agent

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use sea_orm::{Database, DatabaseConnection};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tunneldeck_agent_client::{AgentApi, AgentClientError, AgentTarget, EventByteStream};
use tunneldeck_control::{Fleet, FleetConfig};
use tunneldeck_db::entities::endpoint;
use tunneldeck_db::NewEndpoint;
use tunneldeck_proto::{RemoteInstance, SystemInfo};

pub type EventFeed = mpsc::UnboundedSender<io::Result<Bytes>>;

enum OpenScript {
    Stream(mpsc::UnboundedReceiver<io::Result<Bytes>>),
    Fail(AgentClientError),
}

/// Agent whose answers are set by the test
#[derive(Default)]
pub struct FakeAgent {
    snapshot: Mutex<Option<Vec<RemoteInstance>>>,
    info: Mutex<Option<SystemInfo>>,
    opens: Mutex<VecDeque<OpenScript>>,
    probe_error: Mutex<Option<AgentClientError>>,
    pub open_calls: AtomicUsize,
}

impl FakeAgent {
    /// `None` makes the fetch fail
    pub fn set_snapshot(&self, snapshot: Option<Vec<RemoteInstance>>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn set_info(&self, info: Option<SystemInfo>) {
        *self.info.lock().unwrap() = info;
    }

    pub fn fail_probe(&self, error: Option<AgentClientError>) {
        *self.probe_error.lock().unwrap() = error;
    }

    /// Queue a stream for the next `open_events` call
    pub fn queue_stream(&self) -> EventFeed {
        let (tx, rx) = mpsc::unbounded();
        self.opens.lock().unwrap().push_back(OpenScript::Stream(rx));
        tx
    }

    /// Queue a failure for the next `open_events` call
    pub fn queue_open_failure(&self, error: AgentClientError) {
        self.opens.lock().unwrap().push_back(OpenScript::Fail(error));
    }
}

#[async_trait]
impl AgentApi for FakeAgent {
    async fn fetch_instances(
        &self,
        _target: &AgentTarget,
    ) -> Result<Vec<RemoteInstance>, AgentClientError> {
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentClientError::ConnectionFailed("unreachable".to_string()))
    }

    async fn fetch_info(&self, _target: &AgentTarget) -> Result<SystemInfo, AgentClientError> {
        self.info
            .lock()
            .unwrap()
            .clone()
            .ok_or(AgentClientError::Timeout)
    }

    async fn probe(&self, _target: &AgentTarget, _timeout: Duration) -> Result<(), AgentClientError> {
        match self.probe_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn open_events(
        &self,
        _target: &AgentTarget,
        _timeout: Duration,
    ) -> Result<EventByteStream, AgentClientError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.opens.lock().unwrap().pop_front();
        match script {
            Some(OpenScript::Stream(rx)) => Ok(Box::pin(rx)),
            Some(OpenScript::Fail(error)) => Err(error),
            None => Err(AgentClientError::ConnectionFailed("refused".to_string())),
        }
    }
}

pub struct Harness {
    pub fleet: Fleet,
    pub agent: Arc<FakeAgent>,
    pub db: DatabaseConnection,
    pub endpoint: endpoint::Model,
    _logs: TempDir,
}

pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to test database");
    tunneldeck_db::migrate(&db)
        .await
        .expect("Failed to run migrations");
    db
}

pub async fn harness() -> Harness {
    harness_with(|builder| builder).await
}

pub async fn harness_with(
    configure: impl FnOnce(tunneldeck_control::FleetConfigBuilder) -> tunneldeck_control::FleetConfigBuilder,
) -> Harness {
    let db = setup_test_db().await;
    let logs = TempDir::new().unwrap();
    let config = configure(
        FleetConfig::builder()
            .log_dir(logs.path())
            .connect_timeout(Duration::from_secs(1)),
    )
    .build()
    .unwrap();

    let agent = Arc::new(FakeAgent::default());
    let fleet = Fleet::new(db.clone(), agent.clone(), config);
    let endpoint = fleet
        .add_endpoint(NewEndpoint {
            name: "edge-1".to_string(),
            url: "https://10.0.0.1:9090/".to_string(),
            api_path: "/api".to_string(),
            api_key: "secret".to_string(),
            color: None,
        })
        .await
        .unwrap();

    Harness {
        fleet,
        agent,
        db,
        endpoint,
        _logs: logs,
    }
}

pub fn instance(id: &str, alias: &str, url: &str) -> RemoteInstance {
    RemoteInstance {
        id: id.to_string(),
        alias: alias.to_string(),
        kind: url.split("://").next().unwrap_or_default().to_string(),
        status: "running".to_string(),
        url: url.to_string(),
        ..Default::default()
    }
}

/// Send one event-stream record
pub fn send(feed: &EventFeed, category: &str, data: &str) {
    let record = format!("event: {}\ndata: {}\n\n", category, data);
    feed.unbounded_send(Ok(Bytes::from(record))).unwrap();
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
