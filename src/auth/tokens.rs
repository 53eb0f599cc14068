//! Signed session tokens
//!
//! Wire format: `<payload>.<signature>`, both base64url without padding.
//! The payload is the JSON-encoded [`TokenClaims`]; the signature is
//! HMAC-SHA256 over the encoded payload.

use crate::auth::principal::PrincipalId;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Minimum signing secret length in bytes (256 bits)
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,

    #[error("token is malformed")]
    Malformed,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// Raised when a codec is built with an unusable secret. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenConfigError {
    #[error("signing secret is {len} bytes, at least {min} required", min = MIN_SECRET_LEN)]
    SecretTooShort { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// Claims carried inside a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: PrincipalId,
    pub typ: TokenKind,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
    /// Random nonce so tokens minted in the same second differ
    pub jti: String,
}

/// An issued token: the opaque string plus its decoded claims
#[derive(Clone)]
pub struct SessionToken {
    token: String,
    claims: TokenClaims,
}

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn into_string(self) -> String {
        self.token
    }

    pub fn subject(&self) -> PrincipalId {
        self.claims.sub
    }

    pub fn kind(&self) -> TokenKind {
        self.claims.typ
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.claims.iat
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.exp
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Stateless issuer and verifier of session tokens
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
}

impl TokenCodec {
    /// Build a codec from the process-wide signing secret
    pub fn new(secret: &[u8]) -> Result<Self, TokenConfigError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenConfigError::SecretTooShort { len: secret.len() });
        }

        // HMAC accepts keys of any length, the guard above is the only failure mode
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| TokenConfigError::SecretTooShort { len: secret.len() })?;

        Ok(Self { mac })
    }

    /// Issue a token valid for `ttl` from now
    pub fn issue(&self, subject: PrincipalId, kind: TokenKind, ttl: Duration) -> SessionToken {
        self.issue_at(subject, kind, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: PrincipalId,
        kind: TokenKind,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> SessionToken {
        let mut nonce = [0u8; 16];
        rand::rng().fill(&mut nonce);

        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let claims = TokenClaims {
            sub: subject,
            typ: kind,
            iat: now,
            exp: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            jti: URL_SAFE_NO_PAD.encode(nonce),
        };

        // Claims are plain data, serialization cannot fail
        let payload_json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload_json);
        let signature_b64 = URL_SAFE_NO_PAD.encode(self.sign(payload_b64.as_bytes()));

        SessionToken {
            token: format!("{}.{}", payload_b64, signature_b64),
            claims,
        }
    }

    /// Verify a token against the current time
    ///
    /// The kind is returned, not checked: callers compare it to what they expect.
    pub fn verify(&self, token: &str) -> Result<SessionToken, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionToken, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Empty);
        }

        let (payload_b64, signature_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        if payload_b64.is_empty() || signature_b64.contains('.') {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload_json).map_err(|_| TokenError::Malformed)?;

        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(SessionToken {
            token: token.to_string(),
            claims,
        })
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenCodec([REDACTED])")
    }
}
