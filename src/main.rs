//! Carelink CLI entry point

mod cli;

use crate::cli::{Cli, Commands, KindArg, PermissionArg};
use anyhow::{Context, Result};
use carelink::auth::{
    CredentialHasher, GrantStatus, GuardianGrant, GuardianPermissions, PrincipalId, TokenCodec,
    TokenKind,
};
use carelink::config::{AuthConfig, RouterConfig, ServerConfig};
use carelink::notify::TracingNotifier;
use carelink::server::{AppState, Backends, CarelinkServer};
use carelink::storage::{MemoryCache, PostgresConfig, PostgresStore};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            secret,
            access_ttl_secs,
            refresh_ttl_secs,
            auth_timeout_secs,
            outbound_buffer,
        } => {
            let config = ServerConfig {
                bind_addr: bind,
                token_secret: secret.into_bytes(),
                database_url: cli.database_url,
                auth: AuthConfig::default()
                    .access_ttl(Duration::from_secs(access_ttl_secs))
                    .refresh_ttl(Duration::from_secs(refresh_ttl_secs)),
                router: RouterConfig::default()
                    .auth_timeout(Duration::from_secs(auth_timeout_secs))
                    .outbound_buffer(outbound_buffer),
            };
            serve(config).await
        }
        Commands::Init => {
            let url = cli.database_url.context("DATABASE_URL not set")?;
            init(&url).await
        }
        Commands::Grant {
            guardian,
            subject,
            permissions,
            primary,
            status,
        } => {
            let url = cli.database_url.context("DATABASE_URL not set")?;
            grant(&url, guardian, subject, &permissions, primary, &status).await
        }
        Commands::HashPassword { password } => hash_password(password),
        Commands::IssueToken {
            principal,
            kind,
            ttl_secs,
            secret,
        } => issue_token(principal, kind, ttl_secs, &secret),
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let codec = TokenCodec::new(&config.token_secret).context("Invalid CARELINK_SECRET")?;
    let hasher = CredentialHasher::new().context("Failed to configure credential hashing")?;

    let cache = Arc::new(MemoryCache::new());
    let backends = match &config.database_url {
        Some(url) => {
            let store = Arc::new(connect(url).await?);
            Backends {
                cache: cache.clone(),
                users: store.clone(),
                grants: store,
                notifier: Arc::new(TracingNotifier),
            }
        }
        None => {
            warn!("DATABASE_URL not set, principals and grants are kept in memory");
            Backends {
                cache: cache.clone(),
                ..Backends::in_memory()
            }
        }
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Expired session keys purged");
            }
        }
    });

    let state = AppState::build(codec, hasher, backends, config.auth, config.router);
    let server = CarelinkServer::new(config.bind_addr, state);

    info!("Starting Carelink server...");
    server.run(shutdown_signal()).await
}

async fn connect(url: &str) -> Result<PostgresStore> {
    let pg = PostgresConfig::from_url(url).context("Invalid DATABASE_URL")?;
    let store = PostgresStore::new(pg).context("Failed to create connection pool")?;
    store
        .ensure_schema()
        .await
        .context("Failed to initialize database schema")?;
    Ok(store)
}

async fn init(url: &str) -> Result<()> {
    connect(url).await?;
    println!("Database schema initialized successfully");
    Ok(())
}

async fn grant(
    url: &str,
    guardian: i64,
    subject: i64,
    permissions: &[PermissionArg],
    primary: bool,
    status: &str,
) -> Result<()> {
    let status: GrantStatus = status
        .parse()
        .map_err(|e: String| anyhow::anyhow!("Invalid --status: {}", e))?;

    let mut perms = GuardianPermissions::default();
    for permission in permissions {
        match permission {
            PermissionArg::Location => perms.view_location = true,
            PermissionArg::Activity => perms.view_activity = true,
            PermissionArg::Alerts => perms.receive_alerts = true,
            PermissionArg::Settings => perms.modify_settings = true,
            PermissionArg::All => perms = GuardianPermissions::all(),
        }
    }

    let mut grant = GuardianGrant::approved(PrincipalId::new(guardian), PrincipalId::new(subject), perms);
    grant.status = status;
    grant.is_primary = primary;

    let store = connect(url).await?;
    store.upsert_grant(&grant).await?;

    println!("Guardian {} -> user {} ({})", guardian, subject, grant.status);
    println!("  view_location:   {}", perms.view_location);
    println!("  view_activity:   {}", perms.view_activity);
    println!("  receive_alerts:  {}", perms.receive_alerts);
    println!("  modify_settings: {}", perms.modify_settings);
    if primary {
        println!("  primary");
    }
    Ok(())
}

fn hash_password(password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    anyhow::ensure!(!password.is_empty(), "Password cannot be empty");

    let hasher = CredentialHasher::new().context("Failed to configure credential hashing")?;
    println!("{}", hasher.hash(&password)?);
    Ok(())
}

fn issue_token(principal: i64, kind: KindArg, ttl_secs: u64, secret: &str) -> Result<()> {
    let codec = TokenCodec::new(secret.as_bytes()).context("Invalid CARELINK_SECRET")?;
    let kind = match kind {
        KindArg::Access => TokenKind::Access,
        KindArg::Refresh => TokenKind::Refresh,
    };

    let token = codec.issue(PrincipalId::new(principal), kind, Duration::from_secs(ttl_secs));

    println!("{}", token.as_str());
    println!();
    println!("Principal: {}", token.subject());
    println!("Kind: {}", token.kind());
    println!("Expires: {}", token.expires_at().to_rfc3339());
    if kind == TokenKind::Refresh {
        println!("Note: refresh tokens are only honoured once stored by a login");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
