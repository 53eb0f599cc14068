//! Stress tests for Carelink
//!
//! Races and volume: concurrent refresh of one token, connection churn
//! during fan-out, and many guardians with many connections.

use carelink::auth::{
    AuthError, Credentials, CredentialHasher, GuardianGrant, GuardianPermissions, PrincipalId,
    Registration, TokenCodec,
};
use carelink::config::{AuthConfig, RouterConfig};
use carelink::events::{Event, EventClass};
use carelink::notify::TracingNotifier;
use carelink::server::{AppState, Backends};
use carelink::storage::{MemoryCache, MemoryGrantStore, MemoryUserStore};
use carelink::topics::TopicPattern;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SECRET: &[u8] = b"stress-test-secret-0123456789abcdef-xyz";

fn build(grants: Arc<MemoryGrantStore>, router_config: RouterConfig) -> AppState {
    AppState::build(
        TokenCodec::new(SECRET).unwrap(),
        CredentialHasher::with_cost(8, 1, 1).unwrap(),
        Backends {
            cache: Arc::new(MemoryCache::new()),
            users: Arc::new(MemoryUserStore::new()),
            grants,
            notifier: Arc::new(TracingNotifier),
        },
        AuthConfig::default(),
        router_config,
    )
}

/// Many clients presenting the same refresh token: exactly one rotation wins
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_single_winner() {
    let state = build(Arc::new(MemoryGrantStore::new()), RouterConfig::default());
    state
        .auth
        .register(Registration {
            username: "grace".into(),
            email: None,
            password: "pw".into(),
        })
        .await
        .unwrap();

    for _round in 0..10 {
        let login = state
            .auth
            .login(Credentials {
                login: "grace".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        let token = login.tokens.refresh.as_str().to_string();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let auth = state.auth.clone();
                let token = token.clone();
                tokio::spawn(async move { auth.refresh(&token).await })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(pair) => winners.push(pair),
                Err(e) => assert_eq!(e, AuthError::InvalidSession),
            }
        }

        assert_eq!(winners.len(), 1);

        // The winner's new refresh token is the session's only valid one
        state
            .auth
            .refresh(winners[0].refresh.as_str())
            .await
            .unwrap();
    }
}

/// Connections coming and going while events are published
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_directory_churn_during_publish() {
    let user = PrincipalId::new(1);
    let guardians: Vec<_> = (100..120).map(PrincipalId::new).collect();
    let grants = Arc::new(MemoryGrantStore::new());
    for guardian in &guardians {
        grants.insert(GuardianGrant::approved(*guardian, user, GuardianPermissions::all()));
    }
    let state = build(grants, RouterConfig::default());

    let churners: Vec<_> = guardians
        .iter()
        .map(|guardian| {
            let router = state.router.clone();
            let guardian = *guardian;
            tokio::spawn(async move {
                for _ in 0..50 {
                    let (conn, rx) = router.register(guardian);
                    conn.subscribe(TopicPattern::parse("users.1.*").unwrap());
                    tokio::task::yield_now().await;
                    router.disconnect(&conn);
                    drop(rx);
                }
            })
        })
        .collect();

    let publisher = {
        let router = state.router.clone();
        tokio::spawn(async move {
            for seq in 0..200 {
                let event = Event::new(user, EventClass::Location, serde_json::json!({ "seq": seq }));
                let report = router.publish(&event).await.unwrap();
                assert_eq!(report.recipients, 20);
                assert!(report.delivered + report.failed <= 20 * 50);
            }
        })
    };

    for handle in churners {
        handle.await.unwrap();
    }
    publisher.await.unwrap();

    assert_eq!(state.router.connection_count(), 0);
    assert_eq!(state.router.directory().principal_count(), 0);
}

/// Fan-out to many guardians with several connections each
#[tokio::test]
async fn test_fan_out_volume() {
    let user = PrincipalId::new(1);
    let grants = Arc::new(MemoryGrantStore::new());
    let guardians: Vec<_> = (2..202).map(PrincipalId::new).collect();
    for guardian in &guardians {
        grants.insert(GuardianGrant::approved(*guardian, user, GuardianPermissions::all()));
    }
    let state = build(grants, RouterConfig::default().outbound_buffer(1024));

    let mut receivers = Vec::new();
    for guardian in &guardians {
        for _ in 0..3 {
            let (conn, rx) = state.router.register(*guardian);
            conn.subscribe(TopicPattern::parse("users.1.*").unwrap());
            receivers.push(rx);
        }
    }
    assert_eq!(state.router.connection_count(), 600);

    let start = Instant::now();
    for seq in 0..100 {
        let event = Event::new(user, EventClass::Activity, serde_json::json!({ "seq": seq }));
        let report = state.router.publish(&event).await.unwrap();
        assert_eq!(report.delivered, 600);
        assert_eq!(report.failed, 0);
    }
    let elapsed = start.elapsed();

    for rx in receivers.iter_mut() {
        let mut expected = 0;
        while let Ok(msg) = rx.try_recv() {
            let frame: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
            assert_eq!(frame["event"]["payload"]["seq"], expected);
            expected += 1;
        }
        assert_eq!(expected, 100);
    }

    println!("60,000 deliveries in {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(10), "Fan-out too slow: {:?}", elapsed);
}

/// Concurrent publishers for different users never cross streams
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishers_stay_isolated() {
    let grants = Arc::new(MemoryGrantStore::new());
    let pairs: Vec<_> = (0..10)
        .map(|i| (PrincipalId::new(i), PrincipalId::new(1000 + i)))
        .collect();
    for (user, guardian) in &pairs {
        grants.insert(GuardianGrant::approved(*guardian, *user, GuardianPermissions::all()));
    }
    let state = build(grants, RouterConfig::default().outbound_buffer(512));

    let mut receivers = Vec::new();
    for (_, guardian) in &pairs {
        let (conn, rx) = state.router.register(*guardian);
        conn.subscribe(TopicPattern::parse("users.*").unwrap());
        receivers.push(rx);
    }

    let publishers: Vec<_> = pairs
        .iter()
        .map(|(user, _)| {
            let router = state.router.clone();
            let user = *user;
            tokio::spawn(async move {
                for seq in 0..200 {
                    let event = Event::new(user, EventClass::Location, serde_json::json!({ "seq": seq }));
                    router.publish(&event).await.unwrap();
                }
            })
        })
        .collect();
    for handle in publishers {
        handle.await.unwrap();
    }

    for ((user, _), rx) in pairs.iter().zip(receivers.iter_mut()) {
        let mut count = 0;
        while let Ok(msg) = rx.try_recv() {
            let frame: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
            assert_eq!(frame["event"]["owner_user_id"], user.get());
            assert_eq!(frame["event"]["payload"]["seq"], count);
            count += 1;
        }
        assert_eq!(count, 200);
    }
}
