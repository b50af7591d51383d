//! # synthgen_api
//!
//! HTTP surface of the Synthgen credential engine.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::Router;
use axum::routing::{delete, get, post};
use sqlx::PgPool;
use synthgen_core::auth::api_keys::ApiKeyService;
use synthgen_core::auth::session::SessionService;
use synthgen_core::auth::stores::AuthServices;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{api_keys, auth};

/// Route paths.
pub mod routes {
    pub const POST_AUTH_REGISTER: &str = "/auth/register";
    pub const POST_AUTH_LOGIN: &str = "/auth/login";
    pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
    pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
    pub const POST_AUTH_VERIFY_EMAIL: &str = "/auth/verify-email";
    pub const POST_AUTH_PASSWORD_RESET: &str = "/auth/password-reset";
    pub const POST_AUTH_PASSWORD_RESET_CONFIRM: &str = "/auth/password-reset/confirm";
    pub const GET_AUTH_ME: &str = "/auth/me";
    pub const AUTH_API_KEYS: &str = "/auth/api-keys";
    pub const DELETE_AUTH_API_KEYS_ID: &str = "/auth/api-keys/{id}";
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
    pub api_keys: ApiKeyService,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(services: AuthServices, config: ApiConfig) -> Self {
        Self {
            sessions: services.sessions,
            api_keys: services.api_keys,
            config,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `synthgen_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    synthgen_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::POST_AUTH_VERIFY_EMAIL, post(auth::verify_email_handler))
        .route(
            routes::POST_AUTH_PASSWORD_RESET,
            post(auth::password_reset_handler),
        )
        .route(
            routes::POST_AUTH_PASSWORD_RESET_CONFIRM,
            post(auth::password_reset_confirm_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route(
            routes::AUTH_API_KEYS,
            post(api_keys::create_api_key_handler).get(api_keys::list_api_keys_handler),
        )
        .route(
            routes::DELETE_AUTH_API_KEYS_ID,
            delete(api_keys::delete_api_key_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
