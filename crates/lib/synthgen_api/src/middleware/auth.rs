//! Authentication middleware: a bearer API key, or a bearer or cookie
//! access token verified by the session service.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use synthgen_core::auth::api_keys::API_KEY_PREFIX;
use synthgen_core::models::auth::Subject;

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::ACCESS_COOKIE;

/// How the caller proved who they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Access token; `expires_at` is its `exp` claim.
    Session { expires_at: i64 },
    ApiKey { key_id: String },
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Session { .. } => "session",
            AuthMethod::ApiKey { .. } => "api_key",
        }
    }
}

/// Stored in request extensions once the caller is verified.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub subject: Subject,
    pub method: AuthMethod,
}

/// Token from `Authorization: Bearer`, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Axum middleware: resolves the caller and injects [`AuthenticatedUser`].
///
/// A bearer value with the API key prefix is checked against the key store
/// and acts as the key's owner, who must still be active. Anything else is
/// an access token from the bearer header or the access cookie. Every
/// failure is the same 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .or_else(|| {
            CookieJar::from_headers(request.headers())
                .get(ACCESS_COOKIE)
                .map(|c| c.value().to_string())
        })
        .ok_or_else(AppError::unauthorized)?;

    let user = if token.starts_with(API_KEY_PREFIX) {
        let record = state.api_keys.authenticate(&token).await?;
        AuthenticatedUser {
            subject: state.sessions.active_subject(&record.owner_id).await?,
            method: AuthMethod::ApiKey { key_id: record.id },
        }
    } else {
        let claims = state.sessions.authenticate(&token).await?;
        AuthenticatedUser {
            method: AuthMethod::Session {
                expires_at: claims.exp,
            },
            subject: Subject {
                id: claims.sub,
                email: claims.email,
                role: claims.role,
            },
        }
    };
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
