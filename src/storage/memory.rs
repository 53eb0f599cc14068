//! In-memory storage backends for development and tests

use crate::auth::grants::GuardianGrant;
use crate::auth::principal::{NewPrincipal, Principal, PrincipalId};
use crate::storage::{GuardianRelationshipStore, KeyValueCache, StorageError, UserStore};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// TTL cache backed by a sharded map; expired keys are dropped lazily
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Live (unexpired) key count
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX as u64));

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value))
    }
}

#[derive(Default)]
struct UserTable {
    next_id: i64,
    rows: HashMap<PrincipalId, Principal>,
}

/// Principal table guarded by a single lock so uniqueness checks are atomic
#[derive(Default)]
pub struct MemoryUserStore {
    table: RwLock<UserTable>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a principal's `active` flag; returns false if unknown
    pub fn set_active(&self, id: PrincipalId, active: bool) -> bool {
        match self.table.write().rows.get_mut(&id) {
            Some(principal) => {
                principal.active = active;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, StorageError> {
        Ok(self.table.read().rows.get(&id).cloned())
    }

    async fn find_by_username_or_email(&self, login: &str) -> Result<Option<Principal>, StorageError> {
        Ok(self
            .table
            .read()
            .rows
            .values()
            .find(|p| p.username == login || p.email.as_deref() == Some(login))
            .cloned())
    }

    async fn touch_last_seen(&self, id: PrincipalId) -> Result<(), StorageError> {
        if let Some(principal) = self.table.write().rows.get_mut(&id) {
            principal.last_seen_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert(&self, new: NewPrincipal) -> Result<Principal, StorageError> {
        let mut table = self.table.write();

        // Logins resolve against both columns, so identifiers must be unique across them
        let claimed = |id: &str| {
            table
                .rows
                .values()
                .any(|p| p.username == id || p.email.as_deref() == Some(id))
        };
        let taken = claimed(new.username.as_str()) || new.email.as_deref().is_some_and(claimed);
        if taken {
            return Err(StorageError::Conflict(format!(
                "username or email already registered: {}",
                new.username
            )));
        }

        table.next_id += 1;
        let principal = Principal {
            id: PrincipalId::new(table.next_id),
            username: new.username,
            email: new.email,
            credential_hash: new.credential_hash,
            active: true,
            roles: new.roles,
            last_seen_at: None,
        };
        table.rows.insert(principal.id, principal.clone());

        Ok(principal)
    }
}

/// Guardian grants held in a vector, in insertion order
#[derive(Default)]
pub struct MemoryGrantStore {
    grants: RwLock<Vec<GuardianGrant>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, grant: GuardianGrant) {
        self.grants.write().push(grant);
    }

    /// Apply `f` to every grant between `guardian` and `subject`; returns how many changed
    pub fn update<F>(&self, guardian: PrincipalId, subject: PrincipalId, mut f: F) -> usize
    where
        F: FnMut(&mut GuardianGrant),
    {
        let mut grants = self.grants.write();
        let mut count = 0;
        for grant in grants
            .iter_mut()
            .filter(|g| g.guardian_id == guardian && g.subject_user_id == subject)
        {
            f(grant);
            count += 1;
        }
        count
    }
}

#[async_trait]
impl GuardianRelationshipStore for MemoryGrantStore {
    async fn grants_for(&self, subject_user_id: PrincipalId) -> Result<Vec<GuardianGrant>, StorageError> {
        Ok(self
            .grants
            .read()
            .iter()
            .filter(|g| g.subject_user_id == subject_user_id)
            .cloned()
            .collect())
    }
}
