//! Guardian-scoped event fan-out
//!
//! Entitlement is computed per publish from live guardian grants; a guardian
//! receives an event on every connection subscribed to its topic.

use crate::auth::grants::PermissionGate;
use crate::auth::principal::PrincipalId;
use crate::auth::service::{AuthError, AuthService};
use crate::config::RouterConfig;
use crate::events::Event;
use crate::notify::PushNotifier;
use crate::server::connections::{ConnectionDirectory, LiveConnection, OutboundMessage};
use crate::server::protocol::ServerMessage;
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// Guardian grants could not be read; nothing was delivered
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// Outcome of one publish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Guardians entitled to the event
    pub recipients: usize,
    /// Frames queued to connections
    pub delivered: usize,
    /// Connections that failed and were closed
    pub failed: usize,
    /// Push notifications accepted by the notifier
    pub pushed: usize,
    pub push_failed: usize,
}

/// Routes events to connected, entitled guardians
pub struct EventRouter {
    auth: Arc<AuthService>,
    gate: PermissionGate,
    notifier: Arc<dyn PushNotifier>,
    directory: ConnectionDirectory,
    config: RouterConfig,
}

impl EventRouter {
    pub fn new(
        auth: Arc<AuthService>,
        gate: PermissionGate,
        notifier: Arc<dyn PushNotifier>,
        config: RouterConfig,
    ) -> Self {
        Self {
            auth,
            gate,
            notifier,
            directory: ConnectionDirectory::new(),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn directory(&self) -> &ConnectionDirectory {
        &self.directory
    }

    pub fn connection_count(&self) -> usize {
        self.directory.count()
    }

    /// Identify the principal behind an access token
    pub fn authenticate(&self, access_token: &str) -> Result<PrincipalId, AuthError> {
        self.auth.authenticate(access_token)
    }

    /// Register an authenticated channel for `principal`
    pub fn register(
        &self,
        principal: PrincipalId,
    ) -> (Arc<LiveConnection>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);
        let conn = Arc::new(LiveConnection::new(principal, tx));
        self.directory.add(conn.clone());

        debug!(conn_id = %conn.id, principal_id = %principal, "Connection registered");
        (conn, rx)
    }

    /// Authenticate with an access token and register on success
    pub fn connect(
        &self,
        access_token: &str,
    ) -> Result<(Arc<LiveConnection>, mpsc::Receiver<OutboundMessage>), AuthError> {
        let principal = self.authenticate(access_token)?;
        Ok(self.register(principal))
    }

    /// Close a connection and release its directory entry
    pub fn disconnect(&self, conn: &LiveConnection) {
        conn.close();
        if self.directory.remove(conn.principal, conn.id).is_some() {
            debug!(conn_id = %conn.id, principal_id = %conn.principal, "Connection removed");
        }
    }

    /// Fan an event out to every entitled guardian
    ///
    /// Emergency events also go to the push notifier for each entitled
    /// guardian with no live connection, or whose every attempted delivery
    /// failed.
    pub async fn publish(&self, event: &Event) -> Result<DeliveryReport, RouterError> {
        let guardians = self
            .gate
            .guardians_for(event.owner_user_id, event.class)
            .await
            .map_err(|e| RouterError::StoreUnavailable(e.to_string()))?;

        let topic = event.topic();
        let frame = ServerMessage::Event {
            topic: topic.to_string(),
            event: event.clone(),
        };
        let payload = serde_json::to_vec(&frame).map_err(|e| RouterError::Encode(e.to_string()))?;

        let mut report = DeliveryReport {
            recipients: guardians.len(),
            ..Default::default()
        };
        let mut unreached = Vec::new();

        for guardian in guardians {
            let conns = self.directory.connections_for(guardian);
            let mut attempted = 0;
            let mut reached = false;

            for conn in &conns {
                if !conn.is_subscribed(&topic) {
                    continue;
                }
                attempted += 1;

                let msg = OutboundMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                match conn.try_deliver(msg) {
                    Ok(()) => {
                        report.delivered += 1;
                        reached = true;
                    }
                    Err(e) => {
                        warn!(
                            conn_id = %conn.id,
                            guardian_id = %guardian,
                            error = %e,
                            "Delivery failed, closing connection"
                        );
                        report.failed += 1;
                        self.disconnect(conn);
                    }
                }
            }

            // Connected but unsubscribed guardians chose not to follow this topic
            if conns.is_empty() || (attempted > 0 && !reached) {
                unreached.push(guardian);
            }
        }

        if event.class.is_emergency() && !unreached.is_empty() {
            let summary = event.summary();
            let pushes = unreached.iter().map(|guardian| {
                let summary = &summary;
                async move { (*guardian, self.notifier.notify(*guardian, summary).await) }
            });

            for (guardian, result) in join_all(pushes).await {
                match result {
                    Ok(()) => report.pushed += 1,
                    Err(e) => {
                        warn!(guardian_id = %guardian, error = %e, "Push fallback failed");
                        report.push_failed += 1;
                    }
                }
            }

            info!(
                owner_user_id = %event.owner_user_id,
                pushed = report.pushed,
                "Emergency fell back to push for unreached guardians"
            );
        } else if !unreached.is_empty() {
            debug!(
                topic = %topic,
                unreached = unreached.len(),
                "Guardians without a live connection"
            );
        }

        debug!(
            topic = %topic,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "Event routed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        CredentialHasher, GuardianGrant, GuardianPermissions, SessionStore, TokenCodec, TokenKind,
    };
    use crate::config::AuthConfig;
    use crate::events::EventClass;
    use crate::notify::TracingNotifier;
    use crate::storage::{MemoryCache, MemoryGrantStore, MemoryUserStore};
    use crate::topics::TopicPattern;
    use std::time::Duration;

    const USER: PrincipalId = PrincipalId::new(1);
    const GUARDIAN: PrincipalId = PrincipalId::new(2);

    fn router(grants: Arc<MemoryGrantStore>) -> EventRouter {
        let auth = AuthService::new(
            TokenCodec::new(b"router-unit-test-secret-0123456789abcdef").unwrap(),
            SessionStore::new(Arc::new(MemoryCache::new())),
            Arc::new(MemoryUserStore::new()),
            CredentialHasher::with_cost(8, 1, 1).unwrap(),
            AuthConfig::default(),
        );
        EventRouter::new(
            Arc::new(auth),
            PermissionGate::new(grants),
            Arc::new(TracingNotifier),
            RouterConfig::default(),
        )
    }

    #[test]
    fn test_connect_requires_access_token() {
        let router = router(Arc::new(MemoryGrantStore::new()));
        let codec = router.auth.codec().clone();

        let access = codec.issue(GUARDIAN, TokenKind::Access, Duration::from_secs(60));
        let refresh = codec.issue(GUARDIAN, TokenKind::Refresh, Duration::from_secs(60));

        let (conn, _rx) = router.connect(access.as_str()).unwrap();
        assert_eq!(conn.principal, GUARDIAN);
        assert_eq!(router.connection_count(), 1);

        assert_eq!(
            router.connect(refresh.as_str()).unwrap_err(),
            AuthError::NotAnAccessToken
        );
        assert!(router.connect("garbage").is_err());
        assert_eq!(router.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_only_to_subscribed_connections() {
        let grants = Arc::new(MemoryGrantStore::new());
        grants.insert(GuardianGrant::approved(GUARDIAN, USER, GuardianPermissions::all()));
        let router = router(grants);

        let (subscribed, mut rx1) = router.register(GUARDIAN);
        let (_idle, mut rx2) = router.register(GUARDIAN);
        subscribed.subscribe(TopicPattern::parse("users.1.*").unwrap());

        let event = Event::new(USER, EventClass::Location, serde_json::json!({"lat": 1}));
        let report = router.publish(&event).await.unwrap();

        assert_eq!(report.recipients, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(rx1.try_recv().unwrap().topic, "users.1.location");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_releases_entry() {
        let router = router(Arc::new(MemoryGrantStore::new()));
        let (conn, _rx) = router.register(GUARDIAN);

        router.disconnect(&conn);
        router.disconnect(&conn);
        assert!(conn.is_closed());
        assert_eq!(router.connection_count(), 0);
    }
}
