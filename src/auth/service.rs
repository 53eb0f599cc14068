//! Login, registration, refresh and logout

use crate::auth::password::CredentialHasher;
use crate::auth::principal::{NewPrincipal, Principal, PrincipalId};
use crate::auth::session::{RotateOutcome, SessionStore};
use crate::auth::tokens::{SessionToken, TokenCodec, TokenError, TokenKind};
use crate::config::AuthConfig;
use crate::storage::{StorageError, UserStore};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Role given to every self-registered principal
pub const DEFAULT_ROLE: &str = "USER";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Unknown login, wrong password, or deactivated principal
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token is not a refresh token")]
    NotARefreshToken,

    #[error("token is not an access token")]
    NotAnAccessToken,

    /// Refresh token revoked, already rotated, or superseded
    #[error("session is no longer valid")]
    InvalidSession,

    #[error("username or email already registered")]
    UsernameTaken,

    #[error("invalid token: {0}")]
    Token(#[from] TokenError),

    /// Session or user store unreachable; retryable
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("credential hashing failed: {0}")]
    Hashing(String),
}

impl AuthError {
    /// Whether retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StoreUnavailable(_))
    }
}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(_) => AuthError::UsernameTaken,
            StorageError::Unavailable(msg) | StorageError::Serialization(msg) => {
                AuthError::StoreUnavailable(msg)
            }
        }
    }
}

/// Login credentials; `login` is a username or an email
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Registration request
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
}

/// An access/refresh token pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SessionToken,
    pub refresh: SessionToken,
}

/// Wire shape of a token pair
#[derive(Debug, Clone, Serialize)]
pub struct TokenPairBody {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

impl From<&TokenPair> for TokenPairBody {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access.as_str().to_string(),
            refresh_token: pair.refresh.as_str().to_string(),
            token_type: "Bearer",
            expires_in: (pair.access.expires_at() - pair.access.issued_at()).num_seconds(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub tokens: TokenPair,
    pub principal: Principal,
}

/// Orchestrates credentials, tokens and refresh sessions
pub struct AuthService {
    codec: TokenCodec,
    sessions: SessionStore,
    users: Arc<dyn UserStore>,
    hasher: CredentialHasher,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(
        codec: TokenCodec,
        sessions: SessionStore,
        users: Arc<dyn UserStore>,
        hasher: CredentialHasher,
        config: AuthConfig,
    ) -> Self {
        Self {
            codec,
            sessions,
            users,
            hasher,
            config,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub async fn register(&self, registration: Registration) -> Result<Principal, AuthError> {
        let credential_hash = self
            .hasher
            .hash_blocking(&registration.password)
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?;

        let principal = self
            .users
            .insert(NewPrincipal {
                username: registration.username,
                email: registration.email,
                credential_hash,
                roles: BTreeSet::from([DEFAULT_ROLE.to_string()]),
            })
            .await?;

        info!(principal_id = %principal.id, "Principal registered");
        Ok(principal)
    }

    /// Verify credentials and open a session
    pub async fn login(&self, credentials: Credentials) -> Result<LoginResponse, AuthError> {
        let found = self
            .users
            .find_by_username_or_email(&credentials.login)
            .await?;

        let matched = self
            .hasher
            .verify_blocking(
                &credentials.password,
                found.as_ref().map(|p| p.credential_hash.as_str()),
            )
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?;

        let principal = match found {
            Some(p) if matched => p,
            Some(p) => {
                debug!(principal_id = %p.id, "Login rejected: wrong credential");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                debug!("Login rejected: unknown login");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !principal.active {
            debug!(principal_id = %principal.id, "Login rejected: principal deactivated");
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.issue_pair(principal.id);
        self.sessions
            .save(principal.id, tokens.refresh.as_str(), self.config.refresh_ttl)
            .await?;

        if let Err(e) = self.users.touch_last_seen(principal.id).await {
            warn!(principal_id = %principal.id, error = %e, "Failed to update last-seen timestamp");
        }

        info!(principal_id = %principal.id, "Login succeeded");
        Ok(LoginResponse { tokens, principal })
    }

    /// Exchange a refresh token for a new pair; the presented token is consumed
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let verified = self.codec.verify(refresh_token)?;
        if verified.kind() != TokenKind::Refresh {
            return Err(AuthError::NotARefreshToken);
        }

        let subject = verified.subject();
        match self.sessions.validate(verified.as_str()).await? {
            Some(owner) if owner == subject => {}
            _ => {
                debug!(principal_id = %subject, "Refresh rejected: session not current");
                return Err(AuthError::InvalidSession);
            }
        }

        let still_active = self
            .users
            .find_by_id(subject)
            .await?
            .is_some_and(|p| p.active);
        if !still_active {
            self.sessions.revoke(subject).await?;
            debug!(principal_id = %subject, "Refresh rejected: principal inactive");
            return Err(AuthError::InvalidSession);
        }

        let tokens = self.issue_pair(subject);
        let outcome = self
            .sessions
            .rotate(
                verified.as_str(),
                tokens.refresh.as_str(),
                subject,
                self.config.refresh_ttl,
            )
            .await?;

        match outcome {
            RotateOutcome::Rotated => {
                debug!(principal_id = %subject, "Refresh token rotated");
                Ok(tokens)
            }
            RotateOutcome::Superseded => Err(AuthError::InvalidSession),
        }
    }

    /// Close the principal's session; succeeds whether or not one existed
    pub async fn logout(&self, principal: PrincipalId) -> Result<(), AuthError> {
        self.sessions.revoke(principal).await?;
        info!(principal_id = %principal, "Logged out");
        Ok(())
    }

    /// Identify the holder of an access token
    pub fn authenticate(&self, access_token: &str) -> Result<PrincipalId, AuthError> {
        let verified = self.codec.verify(access_token)?;
        if verified.kind() != TokenKind::Access {
            return Err(AuthError::NotAnAccessToken);
        }
        Ok(verified.subject())
    }

    fn issue_pair(&self, principal: PrincipalId) -> TokenPair {
        TokenPair {
            access: self
                .codec
                .issue(principal, TokenKind::Access, self.config.access_ttl),
            refresh: self
                .codec
                .issue(principal, TokenKind::Refresh, self.config.refresh_ttl),
        }
    }
}
