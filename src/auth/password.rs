//! Credential hashing (argon2id)

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid hashing parameters: {0}")]
    Params(String),

    #[error("failed to hash credential: {0}")]
    Hash(String),

    #[error("hashing task failed: {0}")]
    Task(String),
}

/// Hashes and verifies credentials in PHC string format
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    /// Hash of a throwaway credential, verified when the principal is unknown
    dummy_hash: String,
}

impl CredentialHasher {
    /// Hasher with the argon2 default cost
    pub fn new() -> Result<Self, PasswordError> {
        Self::with_params(Params::default())
    }

    /// Hasher with explicit cost (memory KiB, iterations, lanes)
    pub fn with_cost(memory_kib: u32, iterations: u32, lanes: u32) -> Result<Self, PasswordError> {
        let params = Params::new(memory_kib, iterations, lanes, None)
            .map_err(|e| PasswordError::Params(e.to_string()))?;
        Self::with_params(params)
    }

    fn with_params(params: Params) -> Result<Self, PasswordError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut hasher = Self {
            argon2,
            dummy_hash: String::new(),
        };
        hasher.dummy_hash = hasher.hash("carelink-dummy-credential")?;
        Ok(hasher)
    }

    pub fn hash(&self, credential: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(credential.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| PasswordError::Hash(e.to_string()))
    }

    /// Check a credential against a stored hash. Unparseable hashes never match.
    pub fn verify(&self, credential: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(credential.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Spend the same work as a real verification, always failing
    pub fn verify_dummy(&self, credential: &str) -> bool {
        let _ = self.verify(credential, &self.dummy_hash);
        false
    }

    /// [`hash`](Self::hash) on the blocking pool
    pub async fn hash_blocking(&self, credential: &str) -> Result<String, PasswordError> {
        let hasher = self.clone();
        let credential = credential.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&credential))
            .await
            .map_err(|e| PasswordError::Task(e.to_string()))?
    }

    /// Verify on the blocking pool; `None` runs the dummy verification
    pub async fn verify_blocking(
        &self,
        credential: &str,
        hash: Option<&str>,
    ) -> Result<bool, PasswordError> {
        let hasher = self.clone();
        let credential = credential.to_string();
        let hash = hash.map(str::to_string);
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&credential, &hash),
            None => hasher.verify_dummy(&credential),
        })
        .await
        .map_err(|e| PasswordError::Task(e.to_string()))
    }
}

impl fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialHasher(argon2id)")
    }
}
