//! Tunnel fleet protocol definitions
//!
//! This crate defines the vocabulary shared by the management plane:
//! remote instance descriptors, stream events, the event-stream frame codec,
//! the instance URL parser and the tunnel naming rules. Nothing here performs I/O.

pub mod codec;
pub mod descriptor;
pub mod events;
pub mod naming;

pub use codec::{CodecError, EventStreamCodec, RawFrame};
pub use descriptor::{parse_descriptor, ParsedDescriptor, TlsMode, TunnelMode};
pub use events::{EventKind, LogLevel, RemoteInstance, StreamEvent, SystemInfo};
pub use naming::{generated_name, is_generated_name, resolve_name, NameState};

/// Path segment (below the agent's API prefix) of the push event feed
pub const EVENTS_PATH: &str = "/events";

/// Path segment of the full instance snapshot
pub const INSTANCES_PATH: &str = "/instances";

/// Path segment of the agent's system information
pub const INFO_PATH: &str = "/info";

/// Header carrying the agent API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Default upper bound for a single event-stream record (1MB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
