//! Authentication request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{Value, json};
use synthgen_core::auth::session::Credentials;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AuthenticatedUser, bearer_token};
use crate::models::{
    AccessTokenResponse, LoginRequest, LogoutResponse, MeResponse, PasswordResetConfirmRequest,
    PasswordResetRequest, PrincipalResponse, RefreshTokenBody, RegisterRequest, TokenRequest,
    TokenResponse, UserInfo,
};
use crate::services::client_ip::extract_client_ip;
use crate::services::cookies::{
    ACCESS_COOKIE, REFRESH_COOKIE, access_cookie, clear_cookies, refresh_cookie,
};

/// Refresh/logout accept an empty or non-JSON body; tokens may live in
/// cookies instead.
fn lenient_body(body: &Bytes) -> RefreshTokenBody {
    serde_json::from_slice(body).unwrap_or_default()
}

/// `POST /auth/register`: create a principal; a verification token is
/// sent out of band.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<PrincipalResponse>)> {
    let principal = state.sessions.sign_up(&body.email, &body.password).await?;
    Ok((StatusCode::CREATED, Json(principal.into())))
}

/// `POST /auth/login`: email + password for a token pair, also set as
/// httpOnly cookies.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let credentials = Credentials {
        email: body.email,
        password: body.password,
        client_ip: extract_client_ip(&headers),
    };
    let pair = state.sessions.sign_in(&credentials).await?;

    let secure = state.config.secure_cookies;
    let jar = jar
        .add(access_cookie(&pair.access_token, pair.expires_in, secure))
        .add(refresh_cookie(
            &pair.refresh_token,
            state.sessions.refresh_ttl().num_seconds(),
            secure,
        ));

    Ok((
        jar,
        Json(TokenResponse {
            user: UserInfo::from(&pair.subject),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".into(),
            expires_in: pair.expires_in,
        }),
    ))
}

/// `POST /auth/refresh`: new access token from the body's refresh token or
/// the refresh cookie. The refresh token itself is kept.
pub async fn refresh_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let token = lenient_body(&body)
        .refresh_token
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(AppError::unauthorized)?;

    let access = state.sessions.refresh(&token).await?;
    let jar = jar.add(access_cookie(
        &access.access_token,
        access.expires_in,
        state.config.secure_cookies,
    ));

    Ok((
        jar,
        Json(AccessTokenResponse {
            access_token: access.access_token,
            token_type: "Bearer".into(),
            expires_in: access.expires_in,
        }),
    ))
}

/// `POST /auth/logout`: revoke every token the caller presents and clear
/// the cookies. Succeeds even when nothing was revocable.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(CookieJar, Json<LogoutResponse>)> {
    let mut tokens: Vec<String> = Vec::new();
    let candidates = [
        bearer_token(&headers),
        lenient_body(&body).refresh_token,
        jar.get(ACCESS_COOKIE).map(|c| c.value().to_string()),
        jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()),
    ];
    for token in candidates.into_iter().flatten() {
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }

    let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let revoked = state.sessions.sign_out(&refs).await?;

    let mut jar = jar;
    for cookie in clear_cookies(state.config.secure_cookies) {
        jar = jar.add(cookie);
    }
    Ok((
        jar,
        Json(LogoutResponse {
            success: true,
            revoked,
        }),
    ))
}

/// `POST /auth/verify-email`
pub async fn verify_email_handler(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> AppResult<Json<Value>> {
    state.sessions.verify_email(&body.token).await?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /auth/password-reset`: always 202, whether or not the email is
/// registered.
pub async fn password_reset_handler(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> (StatusCode, Json<Value>) {
    state.sessions.request_password_reset(&body.email).await;
    (StatusCode::ACCEPTED, Json(json!({ "success": true })))
}

/// `POST /auth/password-reset/confirm`
pub async fn password_reset_confirm_handler(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetConfirmRequest>,
) -> AppResult<Json<Value>> {
    state
        .sessions
        .confirm_password_reset(&body.token, &body.new_password)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /auth/me`
pub async fn me_handler(
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Json<MeResponse> {
    Json(MeResponse::from(&user))
}
