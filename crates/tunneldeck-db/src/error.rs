//! Storage error types

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(i64),

    #[error("Tunnel not found: {0}")]
    TunnelNotFound(i64),

    #[error("Recycled tunnel not found: {0}")]
    RecycleNotFound(i64),

    /// A second row for the same (endpoint, instance) pair was about to be written.
    /// Writers for one endpoint are expected to be serialized, so this points at a
    /// concurrency bug rather than bad input.
    #[error("Duplicate instance {instance_id} on endpoint {endpoint_id}")]
    DuplicateInstance {
        endpoint_id: i64,
        instance_id: String,
    },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

impl StoreError {
    pub(crate) fn on_insert(err: DbErr, endpoint_id: i64, instance_id: &str) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Self::DuplicateInstance {
                endpoint_id,
                instance_id: instance_id.to_string(),
            },
            _ => Self::Db(err),
        }
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
