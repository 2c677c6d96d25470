//! Control-plane error types

use sea_orm::DbErr;
use thiserror::Error;
use tunneldeck_agent_client::AgentClientError;
use tunneldeck_db::StoreError;
use tunneldeck_filelog::FileLogError;

/// Reconciliation failures. Any of them aborts the whole pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to fetch instance snapshot: {0}")]
    Fetch(#[from] AgentClientError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<DbErr> for ReconcileError {
    fn from(err: DbErr) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("File log error: {0}")]
    FileLog(#[from] FileLogError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentClientError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl From<DbErr> for ControlError {
    fn from(err: DbErr) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

pub type Result<T, E = ControlError> = std::result::Result<T, E>;
