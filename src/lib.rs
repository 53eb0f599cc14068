//! Carelink - session layer and guardian-scoped real-time event fan-out
//!
//! Users are issued short-lived access tokens and rotating refresh tokens.
//! Events about a user (location, activity, emergencies, medication) are
//! pushed over WebSocket channels to the guardians that user has approved,
//! with a push-notification fallback for emergencies.

pub mod auth;
pub mod config;
pub mod events;
pub mod notify;
pub mod server;
pub mod storage;
pub mod topics;

pub use auth::{AuthError, AuthService, PermissionGate, PrincipalId, TokenCodec};
pub use events::{Event, EventClass};
pub use server::{CarelinkServer, EventRouter};
pub use topics::{Topic, TopicPattern};
