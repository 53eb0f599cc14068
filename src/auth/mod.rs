//! Authentication and authorization
//!
//! Tokens:
//! - access: short-lived, never stored server-side, presented to the channel and API
//! - refresh: long-lived, one active per principal, rotated on every use
//!
//! Authorization:
//! - guardian grants decide which guardians receive which event classes

pub mod grants;
pub mod password;
pub mod principal;
pub mod service;
pub mod session;
pub mod tokens;

pub use grants::{GrantStatus, GuardianGrant, GuardianPermissions, Permission, PermissionGate};
pub use password::{CredentialHasher, PasswordError};
pub use principal::{NewPrincipal, Principal, PrincipalId};
pub use service::{
    AuthError, AuthService, Credentials, LoginResponse, Registration, TokenPair, TokenPairBody,
};
pub use session::{RotateOutcome, SessionStore};
pub use tokens::{SessionToken, TokenCodec, TokenConfigError, TokenError, TokenKind};
