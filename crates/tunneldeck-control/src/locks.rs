//! Per-endpoint write serialization
//!
//! Event processing and reconciliation both mutate an endpoint's tunnel rows.
//! They take the endpoint's lock for the duration of one mutation, never
//! across a network call.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct EndpointLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl EndpointLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to one endpoint
    pub async fn lock(&self, endpoint_id: i64) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(endpoint_id).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drop the lock of a deleted endpoint
    pub fn forget(&self, endpoint_id: i64) {
        self.locks.remove(&endpoint_id);
    }
}
