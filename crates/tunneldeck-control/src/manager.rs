//! Connection manager: one supervised event-stream session per endpoint
//!
//! Status writes for an endpoint happen under its write lock so that a
//! finishing read loop cannot overwrite the status set by a later
//! disconnect or reconnect. The lock is never held across the stream open
//! or while waiting for a read loop to stop.

use crate::error::{ControlError, Result};
use crate::locks::EndpointLocks;
use crate::processor::EventSink;
use crate::registry::{SessionInfo, SessionRegistry};
use futures::StreamExt;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunneldeck_agent_client::{AgentApi, AgentTarget, EventByteStream};
use tunneldeck_db::{EndpointStatus, EndpointStore};
use tunneldeck_proto::{CodecError, EventStreamCodec, StreamEvent};

/// How long `disconnect` waits for a read loop to notice cancellation
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new session is streaming
    Connected,
    /// A session already existed and was left untouched
    AlreadyConnected,
    /// The endpoint was disconnected while the stream was opening
    Cancelled,
}

/// Why a read loop stopped
#[derive(Debug)]
enum SessionExit {
    Cancelled,
    /// Remote closed the stream or the transport dropped
    Closed(Option<String>),
    /// Framing could not be recovered
    Failed(String),
}

#[derive(Clone)]
pub struct ConnectionManager {
    registry: Arc<SessionRegistry>,
    agent: Arc<dyn AgentApi>,
    sink: Arc<dyn EventSink>,
    db: DatabaseConnection,
    locks: Arc<EndpointLocks>,
    connect_timeout: Duration,
    max_frame_bytes: usize,
}

impl ConnectionManager {
    pub fn new(
        db: DatabaseConnection,
        agent: Arc<dyn AgentApi>,
        sink: Arc<dyn EventSink>,
        locks: Arc<EndpointLocks>,
        connect_timeout: Duration,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            agent,
            sink,
            db,
            locks,
            connect_timeout,
            max_frame_bytes,
        }
    }

    /// Ensure exactly one streaming session for the endpoint.
    ///
    /// A failed open leaves the endpoint OFFLINE (unreachable) or ERROR
    /// (reachable but refused) and is not retried.
    pub async fn connect(&self, endpoint_id: i64, target: AgentTarget) -> Result<ConnectOutcome> {
        let Some((generation, cancel)) = self.registry.reserve(endpoint_id) else {
            debug!(endpoint_id, "Session already active");
            return Ok(ConnectOutcome::AlreadyConnected);
        };

        info!(endpoint_id, url = %target.base_url, "Opening event stream");
        let opened = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.agent.open_events(&target, self.connect_timeout) => Some(result),
        };

        let _guard = self.locks.lock(endpoint_id).await;
        let stream = match opened {
            None => return Ok(ConnectOutcome::Cancelled),
            Some(Err(e)) => {
                if self.registry.remove_if_current(endpoint_id, generation) {
                    let status = if e.is_transport() {
                        EndpointStatus::Offline
                    } else {
                        EndpointStatus::Error
                    };
                    self.write_status(endpoint_id, status).await;
                }
                warn!(endpoint_id, "Failed to open event stream: {}", e);
                return Err(e.into());
            }
            Some(Ok(stream)) => stream,
        };

        if !self.registry.is_current(endpoint_id, generation) {
            return Ok(ConnectOutcome::Cancelled);
        }

        if let Err(e) = EndpointStore::new(&self.db)
            .set_status(endpoint_id, EndpointStatus::Online)
            .await
        {
            self.registry.remove_if_current(endpoint_id, generation);
            return Err(ControlError::from(e));
        }

        let manager = self.clone();
        let task = tokio::spawn(async move {
            let exit = manager.read_loop(endpoint_id, &cancel, stream).await;
            manager.finish(endpoint_id, generation, exit).await;
        });
        self.registry.attach_task(endpoint_id, generation, task);

        info!(endpoint_id, "Event stream connected");
        Ok(ConnectOutcome::Connected)
    }

    async fn read_loop(
        &self,
        endpoint_id: i64,
        cancel: &CancellationToken,
        stream: EventByteStream,
    ) -> SessionExit {
        let codec = EventStreamCodec::with_max_frame_bytes(self.max_frame_bytes);
        let mut frames = FramedRead::new(StreamReader::new(stream), codec);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return SessionExit::Cancelled,
                next = frames.next() => next,
            };

            let frame = match next {
                None => return SessionExit::Closed(None),
                Some(Ok(frame)) => frame,
                Some(Err(e)) if e.is_recoverable() => {
                    warn!(endpoint_id, "Dropping undecodable frame: {}", e);
                    continue;
                }
                Some(Err(CodecError::Io(e))) => return SessionExit::Closed(Some(e.to_string())),
                Some(Err(e)) => return SessionExit::Failed(e.to_string()),
            };

            let event = match StreamEvent::from_frame(frame) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!(endpoint_id, "Dropping malformed event: {}", e);
                    continue;
                }
            };

            if cancel.is_cancelled() {
                return SessionExit::Cancelled;
            }

            let kind = event.kind.clone();
            if let Err(e) = self.sink.handle(endpoint_id, event).await {
                warn!(endpoint_id, %kind, "Event processing failed: {}", e);
            }
        }
    }

    async fn finish(&self, endpoint_id: i64, generation: u64, exit: SessionExit) {
        let status = match &exit {
            // Whoever cancelled already removed the session and set the status
            SessionExit::Cancelled => {
                debug!(endpoint_id, "Read loop cancelled");
                return;
            }
            SessionExit::Closed(reason) => {
                info!(endpoint_id, reason = ?reason, "Event stream closed");
                EndpointStatus::Offline
            }
            SessionExit::Failed(reason) => {
                warn!(endpoint_id, "Event stream failed: {}", reason);
                EndpointStatus::Error
            }
        };

        let _guard = self.locks.lock(endpoint_id).await;
        if self.registry.remove_if_current(endpoint_id, generation) {
            self.write_status(endpoint_id, status).await;
        }
    }

    async fn write_status(&self, endpoint_id: i64, status: EndpointStatus) {
        if let Err(e) = EndpointStore::new(&self.db)
            .set_status(endpoint_id, status)
            .await
        {
            warn!(endpoint_id, %status, "Failed to update endpoint status: {}", e);
        }
    }

    /// Stop the endpoint's session. Returns whether one existed.
    pub async fn disconnect(&self, endpoint_id: i64) -> bool {
        let session = {
            let _guard = self.locks.lock(endpoint_id).await;
            let Some(session) = self.registry.remove(endpoint_id) else {
                return false;
            };
            session.cancel.cancel();
            self.write_status(endpoint_id, EndpointStatus::Disconnected)
                .await;
            session
        };

        if let Some(task) = session.task {
            let abort = task.abort_handle();
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!(endpoint_id, "Read loop did not stop in time, aborting");
                abort.abort();
            }
        }

        info!(endpoint_id, "Disconnected");
        true
    }

    /// Stop every session
    pub async fn disconnect_all(&self) -> usize {
        let ids = self.registry.endpoint_ids();
        let stopped = futures::future::join_all(ids.iter().map(|id| self.disconnect(*id))).await;
        stopped.into_iter().filter(|stopped| *stopped).count()
    }

    pub fn is_connected(&self, endpoint_id: i64) -> bool {
        self.registry.contains(endpoint_id)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }
}
