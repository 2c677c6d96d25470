//! Request/response client for remote tunnel agents
//!
//! Every agent exposes, below its API prefix:
//! - `GET /instances`: full instance snapshot
//! - `GET /info`: system facts
//! - `GET /events`: long-lived event stream
//!
//! Requests carry the agent's API key in `X-API-Key`. Agents commonly run with
//! self-signed certificates, so certificate verification is disabled.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::StatusCode;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use tunneldeck_proto::{
    RemoteInstance, SystemInfo, API_KEY_HEADER, EVENTS_PATH, INFO_PATH, INSTANCES_PATH,
};

/// Default timeout for request/response calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent client errors
#[derive(Debug, Error)]
pub enum AgentClientError {
    #[error("Failed to connect to agent: {0}")]
    ConnectionFailed(String),

    #[error("Timeout waiting for agent")]
    Timeout,

    #[error("Agent answered with HTTP {0}")]
    HttpStatus(u16),

    #[error("Invalid response from agent: {0}")]
    InvalidResponse(String),
}

impl AgentClientError {
    /// Whether the agent could not be reached at all, as opposed to answering badly
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for AgentClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::HttpStatus(status.as_u16())
        } else {
            Self::ConnectionFailed(err.to_string())
        }
    }
}

/// Where and how to reach one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTarget {
    pub base_url: String,
    pub api_path: String,
    pub api_key: String,
}

impl AgentTarget {
    pub fn new(
        base_url: impl Into<String>,
        api_path: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_path: api_path.into(),
            api_key: api_key.into(),
        }
    }

    /// `{base_url}{api_path}{path}`
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let api_path = self.api_path.trim_end_matches('/');
        if api_path.is_empty() || api_path.starts_with('/') {
            format!("{}{}{}", base, api_path, path)
        } else {
            format!("{}/{}{}", base, api_path, path)
        }
    }
}

/// Raw body of an event stream
pub type EventByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Calls the management plane makes against an agent
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Full instance snapshot
    async fn fetch_instances(
        &self,
        target: &AgentTarget,
    ) -> Result<Vec<RemoteInstance>, AgentClientError>;

    /// System facts
    async fn fetch_info(&self, target: &AgentTarget) -> Result<SystemInfo, AgentClientError>;

    /// Check that the event feed answers with HTTP 200 within `timeout`
    async fn probe(&self, target: &AgentTarget, timeout: Duration) -> Result<(), AgentClientError>;

    /// Open the event feed. `timeout` bounds the connect and response headers only.
    async fn open_events(
        &self,
        target: &AgentTarget,
        timeout: Duration,
    ) -> Result<EventByteStream, AgentClientError>;
}

/// reqwest-backed [`AgentApi`]
#[derive(Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    /// Timeout for request/response calls
    timeout: Duration,
}

impl HttpAgentClient {
    pub fn new() -> Result<Self, AgentClientError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| AgentClientError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn get(&self, target: &AgentTarget, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(target.url(path))
            .header(API_KEY_HEADER, &target.api_key)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        target: &AgentTarget,
        path: &str,
    ) -> Result<T, AgentClientError> {
        let response = self.get(target, path).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AgentClientError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| AgentClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    async fn fetch_instances(
        &self,
        target: &AgentTarget,
    ) -> Result<Vec<RemoteInstance>, AgentClientError> {
        let instances: Vec<RemoteInstance> = self.get_json(target, INSTANCES_PATH).await?;
        debug!(url = %target.base_url, count = instances.len(), "Fetched instance snapshot");
        Ok(instances)
    }

    async fn fetch_info(&self, target: &AgentTarget) -> Result<SystemInfo, AgentClientError> {
        self.get_json(target, INFO_PATH).await
    }

    async fn probe(&self, target: &AgentTarget, timeout: Duration) -> Result<(), AgentClientError> {
        // Only the status line matters; dropping the response closes the stream
        let response = self
            .get(target, EVENTS_PATH)
            .header(CACHE_CONTROL, "no-cache")
            .timeout(timeout)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(AgentClientError::HttpStatus(status.as_u16())),
        }
    }

    async fn open_events(
        &self,
        target: &AgentTarget,
        timeout: Duration,
    ) -> Result<EventByteStream, AgentClientError> {
        let request = self
            .get(target, EVENTS_PATH)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send();

        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| AgentClientError::Timeout)??;

        match response.status() {
            StatusCode::OK => {}
            status => return Err(AgentClientError::HttpStatus(status.as_u16())),
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_joins_segments() {
        let target = AgentTarget::new("https://10.0.0.1:9090/", "/api/", "k");
        assert_eq!(target.url("/events"), "https://10.0.0.1:9090/api/events");

        let target = AgentTarget::new("http://host", "api", "k");
        assert_eq!(target.url("/info"), "http://host/api/info");

        let target = AgentTarget::new("http://host", "", "k");
        assert_eq!(target.url("/instances"), "http://host/instances");
    }

    #[test]
    fn test_transport_classification() {
        assert!(AgentClientError::Timeout.is_transport());
        assert!(AgentClientError::ConnectionFailed("refused".into()).is_transport());
        assert!(!AgentClientError::HttpStatus(401).is_transport());
        assert!(!AgentClientError::InvalidResponse("bad".into()).is_transport());
    }
}
