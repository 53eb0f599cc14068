//! Live connection state and the principal → connections directory

use crate::auth::principal::PrincipalId;
use crate::topics::{Topic, TopicPattern};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Message queued for a client, already encoded
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Topic of an event frame; empty for acks
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Lifecycle of a channel
///
/// `Unauthenticated` channels never enter the directory; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unauthenticated => write!(f, "unauthenticated"),
            ConnectionState::Authenticated => write!(f, "authenticated"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a frame could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

/// An authenticated client channel
pub struct LiveConnection {
    pub id: Uuid,
    pub principal: PrincipalId,
    subscriptions: RwLock<HashSet<TopicPattern>>,
    tx: mpsc::Sender<OutboundMessage>,
    state: watch::Sender<ConnectionState>,
}

impl LiveConnection {
    pub fn new(principal: PrincipalId, tx: mpsc::Sender<OutboundMessage>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Authenticated);

        Self {
            id: Uuid::new_v4(),
            principal,
            subscriptions: RwLock::new(HashSet::new()),
            tx,
            state,
        }
    }

    /// Returns false if already subscribed
    pub fn subscribe(&self, pattern: TopicPattern) -> bool {
        self.subscriptions.write().insert(pattern)
    }

    /// Returns false if not subscribed
    pub fn unsubscribe(&self, pattern: &TopicPattern) -> bool {
        self.subscriptions.write().remove(pattern)
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.read().iter().any(|p| p.matches(topic))
    }

    pub fn subscriptions(&self) -> Vec<TopicPattern> {
        self.subscriptions.read().iter().cloned().collect()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Move to `Closed`; returns true on the first call only
    pub fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        })
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    /// Queue without waiting; used by fan-out
    pub fn try_deliver(&self, msg: OutboundMessage) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue, waiting for room; used for replies to the client's own frames
    pub async fn send(&self, msg: OutboundMessage) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.tx.send(msg).await.map_err(|_| DeliveryError::Closed)
    }
}

impl fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConnection")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// All authenticated connections, grouped by principal
///
/// Each principal's connection set is updated under its shard lock, so a
/// registration is never observed half-applied.
#[derive(Clone, Default)]
pub struct ConnectionDirectory {
    by_principal: Arc<DashMap<PrincipalId, HashMap<Uuid, Arc<LiveConnection>>>>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Arc<LiveConnection>) {
        self.by_principal
            .entry(conn.principal)
            .or_default()
            .insert(conn.id, conn);
    }

    /// Remove one connection, dropping the principal's entry when it empties
    pub fn remove(&self, principal: PrincipalId, id: Uuid) -> Option<Arc<LiveConnection>> {
        match self.by_principal.entry(principal) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&id);
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    pub fn connections_for(&self, principal: PrincipalId) -> Vec<Arc<LiveConnection>> {
        self.by_principal
            .get(&principal)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, principal: PrincipalId, id: Uuid) -> Option<Arc<LiveConnection>> {
        self.by_principal
            .get(&principal)
            .and_then(|conns| conns.get(&id).cloned())
    }

    /// Every live connection at the time of the call
    pub fn snapshot(&self) -> Vec<Arc<LiveConnection>> {
        self.by_principal
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn is_connected(&self, principal: PrincipalId) -> bool {
        self.by_principal.contains_key(&principal)
    }

    /// Total live connections
    pub fn count(&self) -> usize {
        self.by_principal.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn principal_count(&self) -> usize {
        self.by_principal.len()
    }
}
