//! Refresh-token sessions in the external cache
//!
//! Two keys per session, both expiring with the refresh token:
//! - `refresh:user:<id>` → current refresh token of the principal
//! - `token:<value>` → principal id
//!
//! A token is valid only while both directions agree, so overwriting the
//! user key is enough to retire the previous token even if its reverse key
//! has not been deleted yet.

use crate::auth::principal::PrincipalId;
use crate::storage::{KeyValueCache, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a rotation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The old token was consumed and the new one installed
    Rotated,
    /// The old token was already consumed, revoked, or replaced
    Superseded,
}

pub fn user_key(principal: PrincipalId) -> String {
    format!("refresh:user:{}", principal)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

/// Bidirectional principal ↔ refresh-token mapping
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn KeyValueCache>,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    /// Install `token` as the principal's only refresh token
    pub async fn save(
        &self,
        principal: PrincipalId,
        token: &str,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let user_key = user_key(principal);
        let previous = self.cache.get(&user_key).await?;

        // User key first: from here on the previous token fails validation
        self.cache.set(&user_key, token, ttl).await?;
        self.cache
            .set(&token_key(token), &principal.to_string(), ttl)
            .await?;

        if let Some(previous) = previous.filter(|p| p != token) {
            self.cache.delete(&token_key(&previous)).await?;
            debug!(principal_id = %principal, "Replaced previous refresh token");
        }

        Ok(())
    }

    /// The principal owning `token`, if it is still their current token
    pub async fn validate(&self, token: &str) -> Result<Option<PrincipalId>, StorageError> {
        let Some(raw) = self.cache.get(&token_key(token)).await? else {
            return Ok(None);
        };

        let principal: PrincipalId = match raw.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!("Refresh mapping holds a non-numeric principal id");
                return Ok(None);
            }
        };

        let current = self.cache.get(&user_key(principal)).await?;
        if current.as_deref() == Some(token) {
            Ok(Some(principal))
        } else {
            Ok(None)
        }
    }

    /// Replace `old` with `new` for `principal`
    ///
    /// Consuming `token:<old>` is atomic, so of several concurrent rotations
    /// of the same token exactly one sees `Rotated`.
    pub async fn rotate(
        &self,
        old: &str,
        new: &str,
        principal: PrincipalId,
        ttl: Duration,
    ) -> Result<RotateOutcome, StorageError> {
        let owner = self.cache.take(&token_key(old)).await?;
        if owner.as_deref() != Some(principal.to_string().as_str()) {
            debug!(principal_id = %principal, "Rotation lost: token already consumed");
            return Ok(RotateOutcome::Superseded);
        }

        // Revoked or replaced by a login between validation and rotation
        let current = self.cache.get(&user_key(principal)).await?;
        if current.as_deref() != Some(old) {
            debug!(principal_id = %principal, "Rotation lost: session replaced");
            return Ok(RotateOutcome::Superseded);
        }

        self.save(principal, new, ttl).await?;
        Ok(RotateOutcome::Rotated)
    }

    /// Remove both directions of the principal's session; idempotent
    pub async fn revoke(&self, principal: PrincipalId) -> Result<(), StorageError> {
        if let Some(token) = self.cache.take(&user_key(principal)).await? {
            self.cache.delete(&token_key(&token)).await?;
            debug!(principal_id = %principal, "Revoked refresh session");
        }
        Ok(())
    }
}
