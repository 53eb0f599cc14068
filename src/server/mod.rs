//! Carelink server implementation
//!
//! Handles HTTP auth endpoints, WebSocket channels, and guardian-scoped event fan-out.

pub mod app;
mod connections;
pub mod http;
pub mod protocol;
mod router;
pub mod websocket;

pub use app::{create_router, AppState, Backends, CarelinkServer};
pub use connections::{
    ConnectionDirectory, ConnectionState, DeliveryError, LiveConnection, OutboundMessage,
};
pub use protocol::{ClientMessage, ServerMessage};
pub use router::{DeliveryReport, EventRouter, RouterError};
