//! Database entities

pub mod endpoint;
pub mod endpoint_event;
pub mod tunnel;
pub mod tunnel_recycle;

pub use endpoint::Entity as Endpoint;
pub use endpoint_event::Entity as EndpointEvent;
pub use tunnel::Entity as Tunnel;
pub use tunnel_recycle::Entity as TunnelRecycle;

pub mod prelude {
    pub use super::endpoint::{EndpointStatus, Entity as Endpoint};
    pub use super::endpoint_event::Entity as EndpointEvent;
    pub use super::tunnel::Entity as Tunnel;
    pub use super::tunnel_recycle::Entity as TunnelRecycle;
}
