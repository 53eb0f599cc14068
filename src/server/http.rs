//! HTTP authentication endpoints
//!
//! Every credential or session failure is reported as the same 401 so a
//! caller cannot tell an unknown login from a wrong password or a stale
//! refresh token. Store outages are a distinct, retryable 503.

use crate::auth::principal::Principal;
use crate::auth::service::{AuthError, Credentials, Registration, TokenPairBody};
use crate::server::app::AppState;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    #[serde(alias = "username", alias = "email")]
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginBody {
    #[serde(flatten)]
    pub tokens: TokenPairBody,
    pub principal: Principal,
}

/// Failure returned by an auth endpoint
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    BadRequest(&'static str),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

/// HTTP status for an auth failure
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::UsernameTaken => StatusCode::CONFLICT,
        AuthError::Hashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::InvalidCredentials
        | AuthError::NotARefreshToken
        | AuthError::NotAnAccessToken
        | AuthError::InvalidSession
        | AuthError::Token(_) => StatusCode::UNAUTHORIZED,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, *message),
            ApiError::Auth(e) => {
                let status = status_for(e);
                let message = match status {
                    StatusCode::SERVICE_UNAVAILABLE => "service temporarily unavailable",
                    StatusCode::CONFLICT => "username or email already registered",
                    StatusCode::INTERNAL_SERVER_ERROR => "internal error",
                    _ => "authentication failed, check your credentials",
                };

                if status.is_server_error() {
                    error!(error = %e, "Auth request failed");
                } else {
                    debug!(error = %e, "Auth request rejected");
                }
                (status, message)
            }
        };

        let mut response = (status, Json(serde_json::json!({ "error": message }))).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("5"));
        }
        response
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Principal>), ApiError> {
    if req.username.trim().is_empty() {
        return Err(ApiError::BadRequest("username is required"));
    }
    if req.password.is_empty() {
        return Err(ApiError::BadRequest("password is required"));
    }

    let principal = state
        .auth
        .register(Registration {
            username: req.username,
            email: req.email.filter(|e| !e.trim().is_empty()),
            password: req.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(principal)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginBody>, ApiError> {
    let response = state
        .auth
        .login(Credentials {
            login: req.login,
            password: req.password,
        })
        .await?;

    Ok(Json(LoginBody {
        tokens: TokenPairBody::from(&response.tokens),
        principal: response.principal,
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPairBody>, ApiError> {
    let tokens = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(TokenPairBody::from(&tokens)))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Auth(AuthError::InvalidCredentials))?;
    let principal = state.auth.authenticate(token)?;
    state.auth.logout(principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health() -> &'static str {
    "ok"
}
