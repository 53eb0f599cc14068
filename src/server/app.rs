//! Service assembly and the HTTP/WebSocket server

use crate::auth::grants::PermissionGate;
use crate::auth::password::CredentialHasher;
use crate::auth::service::AuthService;
use crate::auth::session::SessionStore;
use crate::auth::tokens::TokenCodec;
use crate::config::{AuthConfig, RouterConfig};
use crate::notify::{PushNotifier, TracingNotifier};
use crate::server::http;
use crate::server::router::EventRouter;
use crate::server::websocket::ws_handler;
use crate::storage::{
    GuardianRelationshipStore, KeyValueCache, MemoryCache, MemoryGrantStore, MemoryUserStore,
    UserStore,
};

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// External collaborators the services run against
#[derive(Clone)]
pub struct Backends {
    pub cache: Arc<dyn KeyValueCache>,
    pub users: Arc<dyn UserStore>,
    pub grants: Arc<dyn GuardianRelationshipStore>,
    pub notifier: Arc<dyn PushNotifier>,
}

impl Backends {
    /// Everything in process; state is lost on restart
    pub fn in_memory() -> Self {
        Self {
            cache: Arc::new(MemoryCache::new()),
            users: Arc::new(MemoryUserStore::new()),
            grants: Arc::new(MemoryGrantStore::new()),
            notifier: Arc::new(TracingNotifier),
        }
    }
}

/// Shared state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub router: Arc<EventRouter>,
}

impl AppState {
    pub fn build(
        codec: TokenCodec,
        hasher: CredentialHasher,
        backends: Backends,
        auth_config: AuthConfig,
        router_config: RouterConfig,
    ) -> Self {
        let auth = Arc::new(AuthService::new(
            codec,
            SessionStore::new(backends.cache),
            backends.users,
            hasher,
            auth_config,
        ));

        let router = Arc::new(EventRouter::new(
            auth.clone(),
            PermissionGate::new(backends.grants),
            backends.notifier,
            router_config,
        ));

        Self { auth, router }
    }
}

/// Routes served by the binary
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/ws", get(ws_handler))
        .route("/auth/register", post(http::register))
        .route("/auth/login", post(http::login))
        .route("/auth/refresh", post(http::refresh))
        .route("/auth/logout", post(http::logout))
        .with_state(state)
}

/// Carelink HTTP + WebSocket server
pub struct CarelinkServer {
    bind_addr: SocketAddr,
    state: AppState,
}

impl CarelinkServer {
    pub fn new(bind_addr: SocketAddr, state: AppState) -> Self {
        Self { bind_addr, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then close every live channel
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_addr))?;
        info!(addr = %self.bind_addr, "Carelink server listening");

        let router = self.state.router.clone();
        let app = create_router(self.state);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!(
                    connections = router.connection_count(),
                    "Shutting down, closing live channels"
                );
                for conn in router.directory().snapshot() {
                    router.disconnect(&conn);
                }
            })
            .await
            .context("Server error")?;

        info!("Server stopped");
        Ok(())
    }
}
