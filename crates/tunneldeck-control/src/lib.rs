//! Fleet control plane
//!
//! Two paths keep the local view of every endpoint current:
//! - the **event path**: one streaming session per endpoint feeds decoded
//!   events to the [`EventProcessor`], which journals them, writes the file
//!   log and applies incremental tunnel updates;
//! - the **repair path**: the [`Reconciler`] fetches a full snapshot and makes
//!   the endpoint's tunnel rows match it exactly. Only this path deletes
//!   tunnels the stream never reported as removed.
//!
//! Both paths serialize their writes per endpoint through [`EndpointLocks`].

pub mod config;
pub mod error;
pub mod fleet;
pub mod locks;
pub mod manager;
pub mod materialize;
pub mod processor;
pub mod purge;
pub mod reconcile;
pub mod registry;

pub use config::{FleetConfig, FleetConfigBuilder};
pub use error::{ControlError, ReconcileError, Result};
pub use fleet::{agent_target, EndpointStats, Fleet, SystemInfoRefresh};
pub use locks::EndpointLocks;
pub use manager::{ConnectOutcome, ConnectionManager};
pub use materialize::{apply_instance, ApplyOutcome};
pub use processor::{EventProcessor, EventSink};
pub use purge::{EndpointPurge, RecycledTunnel};
pub use reconcile::{ReconcileReport, Reconciler};
pub use registry::{SessionInfo, SessionRegistry};
