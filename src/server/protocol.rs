//! Channel frames exchanged over the WebSocket
//!
//! Frames are JSON objects tagged by `type`.

use crate::auth::principal::PrincipalId;
use crate::events::Event;
use crate::server::connections::OutboundMessage;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with an access token (when no bearer header was sent)
    Auth { token: String },
    /// Subscribe to a topic or a `prefix.*` pattern
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    /// Publish an event about the caller: topic must be `users.<own id>.<class>`
    Publish {
        topic: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Ping { seq: u64 },
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk { principal_id: PrincipalId },
    AuthError { message: String },
    Subscribed { topic: String },
    SubscribeError { topic: String, message: String },
    Unsubscribed { topic: String },
    Published { topic: String, delivered: usize },
    PublishError { topic: String, message: String },
    /// An event on a subscribed topic
    Event { topic: String, event: Event },
    Pong { seq: u64 },
    Error { message: String },
}

impl ServerMessage {
    /// Encode as a queued frame; `None` (logged) if serialization fails
    pub fn to_outbound(&self) -> Option<OutboundMessage> {
        let topic = match self {
            ServerMessage::Event { topic, .. } => topic.clone(),
            _ => String::new(),
        };

        match serde_json::to_vec(self) {
            Ok(payload) => Some(OutboundMessage { topic, payload }),
            Err(e) => {
                error!(error = %e, "Failed to encode server frame");
                None
            }
        }
    }

    pub fn to_text(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(text) => Some(text),
            Err(e) => {
                error!(error = %e, "Failed to encode server frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventClass;

    #[test]
    fn test_client_frames_parse() {
        let sub: ClientMessage = serde_json::from_str(r#"{"type":"subscribe","topic":"users.4.*"}"#).unwrap();
        assert_eq!(sub, ClientMessage::Subscribe { topic: "users.4.*".to_string() });

        let publish: ClientMessage =
            serde_json::from_str(r#"{"type":"publish","topic":"users.4.location","payload":{"lat":1.0}}"#).unwrap();
        assert!(matches!(publish, ClientMessage::Publish { ref topic, .. } if topic == "users.4.location"));

        let bare: ClientMessage = serde_json::from_str(r#"{"type":"publish","topic":"users.4.activity"}"#).unwrap();
        assert!(matches!(bare, ClientMessage::Publish { payload: serde_json::Value::Null, .. }));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout"}"#).is_err());
    }

    #[test]
    fn test_event_frame_shape() {
        let event = Event::new(PrincipalId::new(4), EventClass::Emergency, serde_json::json!({"sos": true}));
        let frame = ServerMessage::Event {
            topic: event.topic().to_string(),
            event,
        };

        let outbound = frame.to_outbound().unwrap();
        assert_eq!(outbound.topic, "users.4.emergency");

        let json: serde_json::Value = serde_json::from_slice(&outbound.payload).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["topic"], "users.4.emergency");
        assert_eq!(json["event"]["class"], "emergency");
        assert_eq!(json["event"]["payload"]["sos"], true);
    }

    #[test]
    fn test_ack_frames_have_no_topic() {
        let ack = ServerMessage::Pong { seq: 9 }.to_outbound().unwrap();
        assert!(ack.topic.is_empty());
        assert_eq!(
            ServerMessage::Pong { seq: 9 }.to_text().unwrap(),
            r#"{"type":"pong","seq":9}"#
        );
    }
}
