//! Topic naming and subscription patterns
//!
//! Topics are dot-separated segments: `users.42.location`
//! Each segment must match: [a-zA-Z0-9_-]+
//!
//! Event topics always have the shape `users.<owner id>.<event class>`.
//! Subscription patterns may end in a single wildcard segment:
//! - `users.42.*` matches every event class of user 42
//! - `users.*` matches every user
//! - `*` matches everything

use crate::auth::principal::PrincipalId;
use crate::events::EventClass;
use std::fmt;
use thiserror::Error;

/// Root segment of every event topic
pub const USERS_ROOT: &str = "users";

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic cannot be empty")]
    Empty,

    #[error("invalid segment '{0}': must match [a-zA-Z0-9_-]+")]
    InvalidSegment(String),

    #[error("wildcard '*' can only appear as the last segment")]
    WildcardNotAtEnd,

    #[error("empty segment in topic")]
    EmptySegment,
}

fn validate_segments(name: &str) -> Result<(), TopicError> {
    for part in name.split('.') {
        if part.is_empty() {
            return Err(TopicError::EmptySegment);
        }
        if part.contains('*') {
            return Err(TopicError::WildcardNotAtEnd);
        }
        if !is_valid_segment(part) {
            return Err(TopicError::InvalidSegment(part.to_string()));
        }
    }
    Ok(())
}

/// A concrete topic name (no wildcards)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    name: String,
}

impl Topic {
    pub fn parse(name: &str) -> Result<Self, TopicError> {
        if name.is_empty() {
            return Err(TopicError::Empty);
        }
        validate_segments(name)?;

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// The topic an event of `class` about `owner` is published on
    pub fn for_event(owner: PrincipalId, class: EventClass) -> Self {
        Self {
            name: format!("{}.{}.{}", USERS_ROOT, owner, class),
        }
    }

    /// Decode `users.<owner>.<class>`; `None` for any other shape
    pub fn event_address(&self) -> Option<(PrincipalId, EventClass)> {
        let mut parts = self.name.split('.');
        let root = parts.next()?;
        let owner = parts.next()?.parse().ok()?;
        let class = parts.next()?.parse().ok()?;

        if root != USERS_ROOT || parts.next().is_some() {
            return None;
        }

        Some((owner, class))
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A subscription pattern, optionally ending in `.*`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    /// Everything before the wildcard (the full name if there is none)
    prefix: String,
    is_wildcard: bool,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, TopicError> {
        if pattern.is_empty() {
            return Err(TopicError::Empty);
        }

        if pattern == "*" {
            return Ok(Self {
                prefix: String::new(),
                is_wildcard: true,
            });
        }

        let (prefix, is_wildcard) = match pattern.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };
        validate_segments(prefix)?;

        Ok(Self {
            prefix: prefix.to_string(),
            is_wildcard,
        })
    }

    /// Exact pattern for one topic
    pub fn exact(topic: &Topic) -> Self {
        Self {
            prefix: topic.name.clone(),
            is_wildcard: false,
        }
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        if !self.is_wildcard {
            return topic.name == self.prefix;
        }
        if self.prefix.is_empty() {
            return true;
        }

        // "users.4.*" must not match "users.42.location"
        topic.name.starts_with(&self.prefix)
            && topic.name.as_bytes().get(self.prefix.len()) == Some(&b'.')
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_wildcard(&self) -> bool {
        self.is_wildcard
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_wildcard, self.prefix.is_empty()) {
            (true, true) => write!(f, "*"),
            (true, false) => write!(f, "{}.*", self.prefix),
            (false, _) => write!(f, "{}", self.prefix),
        }
    }
}
