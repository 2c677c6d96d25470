//! Active streaming sessions, at most one per endpoint

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Session {
    generation: u64,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    task: Option<JoinHandle<()>>,
}

/// What a caller gets back when a session is taken out of the registry
pub struct RemovedSession {
    pub cancel: CancellationToken,
    pub task: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub endpoint_id: i64,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
}

/// Registry of live sessions
///
/// Each reservation gets a fresh generation number so a finishing read loop
/// can tell whether it still owns its slot.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<i64, Session>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the endpoint's slot. Returns `None` when a session already exists.
    pub fn reserve(&self, endpoint_id: i64) -> Option<(u64, CancellationToken)> {
        match self.sessions.entry(endpoint_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                let cancel = CancellationToken::new();
                slot.insert(Session {
                    generation,
                    cancel: cancel.clone(),
                    started_at: Utc::now(),
                    task: None,
                });
                Some((generation, cancel))
            }
        }
    }

    /// Record the read-loop task of a reservation.
    ///
    /// If the reservation is gone the task is aborted.
    pub fn attach_task(&self, endpoint_id: i64, generation: u64, task: JoinHandle<()>) {
        match self.sessions.get_mut(&endpoint_id) {
            Some(mut session) if session.generation == generation => session.task = Some(task),
            _ => task.abort(),
        }
    }

    pub fn remove(&self, endpoint_id: i64) -> Option<RemovedSession> {
        self.sessions
            .remove(&endpoint_id)
            .map(|(_, session)| RemovedSession {
                cancel: session.cancel,
                task: session.task,
            })
    }

    /// Remove the session only if it is still the given reservation
    pub fn remove_if_current(&self, endpoint_id: i64, generation: u64) -> bool {
        self.sessions
            .remove_if(&endpoint_id, |_, session| session.generation == generation)
            .is_some()
    }

    pub fn is_current(&self, endpoint_id: i64, generation: u64) -> bool {
        self.sessions
            .get(&endpoint_id)
            .is_some_and(|session| session.generation == generation)
    }

    pub fn contains(&self, endpoint_id: i64) -> bool {
        self.sessions.contains_key(&endpoint_id)
    }

    pub fn endpoint_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                endpoint_id: *entry.key(),
                generation: entry.generation,
                started_at: entry.started_at,
            })
            .collect();
        sessions.sort_by_key(|session| session.endpoint_id);
        sessions
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
