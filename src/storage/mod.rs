//! Storage contracts consumed by the auth and routing core
//!
//! - `KeyValueCache`: external TTL cache holding refresh-token mappings
//! - `UserStore`: principal lookup and registration
//! - `GuardianRelationshipStore`: guardian grants per user
//!
//! Backends:
//! - Memory: in-process implementations for development and tests
//! - Postgres: durable users and guardian grants

mod memory;
mod postgres;

pub use memory::{MemoryCache, MemoryGrantStore, MemoryUserStore};
pub use postgres::{PostgresConfig, PostgresStore};

use crate::auth::grants::GuardianGrant;
use crate::auth::principal::{NewPrincipal, Principal, PrincipalId};
pub use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Backend unreachable, timed out, or failed; callers may retry later
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint rejected the write
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Minimal key-value cache with per-key expiry (Redis-like)
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite `key`, expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Atomically read and remove `key` (GETDEL). At most one caller observes the value.
    async fn take(&self, key: &str) -> Result<Option<String>, StorageError>;
}

/// Principal lookup and registration
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, StorageError>;

    /// Case-sensitive match on username, or on email
    async fn find_by_username_or_email(&self, login: &str) -> Result<Option<Principal>, StorageError>;

    async fn touch_last_seen(&self, id: PrincipalId) -> Result<(), StorageError>;

    /// Fails with `Conflict` if the username or email is taken
    async fn insert(&self, principal: NewPrincipal) -> Result<Principal, StorageError>;
}

/// Guardian grants, keyed by the user being cared for
#[async_trait]
pub trait GuardianRelationshipStore: Send + Sync {
    /// Every grant for the subject, whatever its status
    async fn grants_for(&self, subject_user_id: PrincipalId) -> Result<Vec<GuardianGrant>, StorageError>;
}
