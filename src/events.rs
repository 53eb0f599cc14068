//! Events published about a user and fanned out to their guardians

use crate::auth::principal::PrincipalId;
use crate::topics::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class of an event, which decides the guardian permission it requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    Location,
    Activity,
    Emergency,
    Medication,
}

impl EventClass {
    pub const ALL: [EventClass; 4] = [
        EventClass::Location,
        EventClass::Activity,
        EventClass::Emergency,
        EventClass::Medication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Location => "location",
            EventClass::Activity => "activity",
            EventClass::Emergency => "emergency",
            EventClass::Medication => "medication",
        }
    }

    /// Only emergencies fall back to push notifications
    pub fn is_emergency(&self) -> bool {
        matches!(self, EventClass::Emergency)
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventClass {
    type Err = UnknownEventClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| UnknownEventClass(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event class '{0}'")]
pub struct UnknownEventClass(pub String);

/// An ephemeral event about `owner_user_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub owner_user_id: PrincipalId,
    pub class: EventClass,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(owner_user_id: PrincipalId, class: EventClass, payload: serde_json::Value) -> Self {
        Self {
            owner_user_id,
            class,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Topic this event is delivered on: `users.<owner>.<class>`
    pub fn topic(&self) -> Topic {
        Topic::for_event(self.owner_user_id, self.class)
    }

    pub fn summary(&self) -> EventSummary {
        EventSummary {
            owner_user_id: self.owner_user_id,
            class: self.class,
            timestamp: self.timestamp,
            topic: self.topic().to_string(),
        }
    }
}

/// What the push notifier receives: no payload, just enough to alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub owner_user_id: PrincipalId,
    pub class: EventClass,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
}
