//! Resilience tests for Carelink
//!
//! These tests verify behavior under failure conditions like:
//! - Connections dropping mid fan-out
//! - Slow consumers overflowing their queue
//! - Session cache or grant store outages
//! - Emergencies for guardians nobody could reach

use async_trait::async_trait;
use carelink::auth::{
    AuthError, Credentials, CredentialHasher, GuardianGrant, GuardianPermissions, PrincipalId,
    Registration, TokenCodec,
};
use carelink::config::{AuthConfig, RouterConfig};
use carelink::events::{Event, EventClass, EventSummary};
use carelink::notify::{NotifyError, PushNotifier};
use carelink::server::http::status_for;
use carelink::server::{AppState, Backends, RouterError};
use carelink::storage::{
    GuardianRelationshipStore, KeyValueCache, MemoryCache, MemoryGrantStore, MemoryUserStore,
    StorageError,
};
use carelink::topics::TopicPattern;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &[u8] = b"resilience-test-secret-0123456789abcdef";
const USER: PrincipalId = PrincipalId::new(1);

/// Cache that can be switched off to simulate an outage
#[derive(Default)]
struct FlakyCache {
    inner: MemoryCache,
    down: AtomicBool,
}

impl FlakyCache {
    fn check(&self) -> Result<(), StorageError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueCache for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        self.inner.take(key).await
    }
}

struct DownGrantStore;

#[async_trait]
impl GuardianRelationshipStore for DownGrantStore {
    async fn grants_for(&self, _subject: PrincipalId) -> Result<Vec<GuardianGrant>, StorageError> {
        Err(StorageError::Unavailable("timeout".into()))
    }
}

/// Records every push; fails for guardians listed in `reject`
#[derive(Default)]
struct RecordingNotifier {
    pushed: Mutex<Vec<(PrincipalId, EventSummary)>>,
    reject: Vec<PrincipalId>,
}

#[async_trait]
impl PushNotifier for RecordingNotifier {
    async fn notify(&self, guardian: PrincipalId, summary: &EventSummary) -> Result<(), NotifyError> {
        if self.reject.contains(&guardian) {
            return Err(NotifyError("device token expired".into()));
        }
        self.pushed.lock().push((guardian, summary.clone()));
        Ok(())
    }
}

fn build(
    cache: Arc<dyn KeyValueCache>,
    grants: Arc<dyn GuardianRelationshipStore>,
    notifier: Arc<dyn PushNotifier>,
    router_config: RouterConfig,
) -> AppState {
    AppState::build(
        TokenCodec::new(SECRET).unwrap(),
        CredentialHasher::with_cost(8, 1, 1).unwrap(),
        Backends {
            cache,
            users: Arc::new(MemoryUserStore::new()),
            grants,
            notifier,
        },
        AuthConfig::default(),
        router_config,
    )
}

fn grants_for_all(guardians: &[PrincipalId]) -> Arc<MemoryGrantStore> {
    let store = Arc::new(MemoryGrantStore::new());
    for guardian in guardians {
        store.insert(GuardianGrant::approved(*guardian, USER, GuardianPermissions::all()));
    }
    store
}

fn emergency() -> Event {
    Event::new(USER, EventClass::Emergency, serde_json::json!({"fall_detected": true}))
}

/// One of a guardian's three connections is gone: the other two still get the event
#[tokio::test]
async fn test_one_of_three_connections_closed() {
    let guardian = PrincipalId::new(2);
    let notifier = Arc::new(RecordingNotifier::default());
    let state = build(
        Arc::new(MemoryCache::new()),
        grants_for_all(&[guardian]),
        notifier.clone(),
        RouterConfig::default(),
    );
    let router = &state.router;

    let mut live = Vec::new();
    let mut dead_conn = None;
    for i in 0..3 {
        let (conn, rx) = router.register(guardian);
        conn.subscribe(TopicPattern::parse("users.1.*").unwrap());
        if i == 1 {
            drop(rx);
            dead_conn = Some(conn);
        } else {
            live.push(rx);
        }
    }

    let report = router.publish(&emergency()).await.unwrap();
    assert_eq!(report.recipients, 1);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.pushed, 0);

    let dead_conn = dead_conn.unwrap();
    assert!(dead_conn.is_closed());
    assert_eq!(router.connection_count(), 2);

    for rx in live.iter_mut() {
        let frame: serde_json::Value = serde_json::from_slice(&rx.try_recv().unwrap().payload).unwrap();
        assert_eq!(frame["topic"], "users.1.emergency");
    }
    assert!(notifier.pushed.lock().is_empty());
}

/// A consumer that never drains is closed instead of losing events silently
#[tokio::test]
async fn test_slow_consumer_is_disconnected() {
    let guardian = PrincipalId::new(2);
    let state = build(
        Arc::new(MemoryCache::new()),
        grants_for_all(&[guardian]),
        Arc::new(RecordingNotifier::default()),
        RouterConfig::default().outbound_buffer(2),
    );
    let router = &state.router;

    let (slow, _slow_rx) = router.register(guardian);
    let (fast, mut fast_rx) = router.register(guardian);
    slow.subscribe(TopicPattern::parse("users.1.*").unwrap());
    fast.subscribe(TopicPattern::parse("users.1.*").unwrap());

    let mut failed = 0;
    for seq in 0..5 {
        let event = Event::new(USER, EventClass::Activity, serde_json::json!({ "seq": seq }));
        let report = router.publish(&event).await.unwrap();
        failed += report.failed;

        // The fast consumer keeps up
        assert!(fast_rx.try_recv().is_ok());
    }

    assert_eq!(failed, 1);
    assert!(slow.is_closed());
    assert!(!fast.is_closed());
    assert_eq!(router.connection_count(), 1);
}

/// Cache outages surface as retryable store errors, never as bad credentials
#[tokio::test]
async fn test_cache_outage_is_store_unavailable() {
    let cache = Arc::new(FlakyCache::default());
    let state = build(
        cache.clone(),
        Arc::new(MemoryGrantStore::new()),
        Arc::new(RecordingNotifier::default()),
        RouterConfig::default(),
    );
    let auth = &state.auth;

    auth.register(Registration {
        username: "frank".into(),
        email: None,
        password: "pw".into(),
    })
    .await
    .unwrap();
    let creds = || Credentials {
        login: "frank".into(),
        password: "pw".into(),
    };

    let session = auth.login(creds()).await.unwrap();

    cache.down.store(true, Ordering::SeqCst);

    let err = auth.login(creds()).await.unwrap_err();
    assert!(matches!(err, AuthError::StoreUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(status_for(&err).as_u16(), 503);

    let err = auth.refresh(session.tokens.refresh.as_str()).await.unwrap_err();
    assert!(matches!(err, AuthError::StoreUnavailable(_)));

    // Access tokens are stateless and keep working
    assert!(auth.authenticate(session.tokens.access.as_str()).is_ok());

    cache.down.store(false, Ordering::SeqCst);
    auth.refresh(session.tokens.refresh.as_str()).await.unwrap();
}

/// Without grants nothing may be delivered, not even to subscribed connections
#[tokio::test]
async fn test_grant_store_outage_fails_publish() {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = build(
        Arc::new(MemoryCache::new()),
        Arc::new(DownGrantStore),
        notifier.clone(),
        RouterConfig::default(),
    );

    let (conn, mut rx) = state.router.register(PrincipalId::new(2));
    conn.subscribe(TopicPattern::parse("*").unwrap());

    let err = state.router.publish(&emergency()).await.unwrap_err();
    assert!(matches!(err, RouterError::StoreUnavailable(_)));
    assert!(rx.try_recv().is_err());
    assert!(notifier.pushed.lock().is_empty());
}

/// Offline guardians and guardians whose every delivery failed are pushed exactly once
#[tokio::test]
async fn test_emergency_push_fallback_for_unreached_guardians() {
    let reached = PrincipalId::new(10);
    let unsubscribed = PrincipalId::new(11);
    let offline = PrincipalId::new(12);
    let broken = PrincipalId::new(13);

    let grants = grants_for_all(&[reached, unsubscribed, broken]);
    grants.insert(GuardianGrant::approved(offline, USER, GuardianPermissions::all()).primary());

    let notifier = Arc::new(RecordingNotifier::default());
    let state = build(
        Arc::new(MemoryCache::new()),
        grants,
        notifier.clone(),
        RouterConfig::default(),
    );
    let router = &state.router;

    let (conn, _reached_rx) = router.register(reached);
    conn.subscribe(TopicPattern::parse("users.1.emergency").unwrap());

    let (_conn, _idle_rx) = router.register(unsubscribed);

    let (conn, broken_rx) = router.register(broken);
    conn.subscribe(TopicPattern::parse("users.1.*").unwrap());
    drop(broken_rx);

    let report = router.publish(&emergency()).await.unwrap();
    assert_eq!(report.recipients, 4);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.pushed, 2);
    assert_eq!(report.push_failed, 0);

    let pushed = notifier.pushed.lock();
    let guardians: Vec<_> = pushed.iter().map(|(g, _)| *g).collect();

    // Primary guardian is escalated to first
    assert_eq!(guardians, vec![offline, broken]);

    let (_, summary) = &pushed[0];
    assert_eq!(summary.owner_user_id, USER);
    assert_eq!(summary.class, EventClass::Emergency);
    assert_eq!(summary.topic, "users.1.emergency");
}

/// A guardian online but not following the topic gets neither a frame nor a push
#[tokio::test]
async fn test_connected_unsubscribed_guardian_is_not_pushed() {
    let guardian = PrincipalId::new(50);
    let notifier = Arc::new(RecordingNotifier::default());
    let state = build(
        Arc::new(MemoryCache::new()),
        grants_for_all(&[guardian]),
        notifier.clone(),
        RouterConfig::default(),
    );

    let (conn, mut rx) = state.router.register(guardian);
    let report = state.router.publish(&emergency()).await.unwrap();

    assert_eq!(report.recipients, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.pushed, 0);
    assert!(notifier.pushed.lock().is_empty());
    assert!(rx.try_recv().is_err());
    assert!(!conn.is_closed());

    // Once the connection is gone the guardian is offline and escalated
    state.router.disconnect(&conn);
    let report = state.router.publish(&emergency()).await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(notifier.pushed.lock()[0].0, guardian);
}

#[tokio::test]
async fn test_non_emergency_events_never_push() {
    let guardian = PrincipalId::new(2);
    let notifier = Arc::new(RecordingNotifier::default());
    let state = build(
        Arc::new(MemoryCache::new()),
        grants_for_all(&[guardian]),
        notifier.clone(),
        RouterConfig::default(),
    );

    for class in [EventClass::Location, EventClass::Activity, EventClass::Medication] {
        let report = state
            .router
            .publish(&Event::new(USER, class, serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(report.pushed, 0);
    }
    assert!(notifier.pushed.lock().is_empty());
}

#[tokio::test]
async fn test_push_failure_does_not_abort_publish() {
    let lucky = PrincipalId::new(2);
    let unlucky = PrincipalId::new(3);
    let notifier = Arc::new(RecordingNotifier {
        reject: vec![unlucky],
        ..Default::default()
    });
    let state = build(
        Arc::new(MemoryCache::new()),
        grants_for_all(&[lucky, unlucky]),
        notifier.clone(),
        RouterConfig::default(),
    );

    let report = state.router.publish(&emergency()).await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.push_failed, 1);
    assert_eq!(notifier.pushed.lock()[0].0, lucky);
}
