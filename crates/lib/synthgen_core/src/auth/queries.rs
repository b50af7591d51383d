//! Auth-related database queries.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::AuthError;
use crate::models::auth::{ApiKeyRecord, NewPrincipal, OneTimeTokenRecord, Principal};

type PrincipalRow = (
    String,
    String,
    Option<String>,
    String,
    bool,
    bool,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

const PRINCIPAL_COLUMNS: &str = "id::text, email, password_hash, role, is_active, is_verified, \
     tier, last_login_at, created_at";

fn principal_from_row(row: PrincipalRow) -> Principal {
    let (id, email, password_hash, role, is_active, is_verified, tier, last_login_at, created_at) =
        row;
    Principal {
        id,
        email,
        password_hash,
        role,
        is_active,
        is_verified,
        tier,
        last_login_at,
        created_at,
    }
}

type ApiKeyRow = (
    String,
    String,
    String,
    String,
    bool,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

const API_KEY_COLUMNS: &str =
    "id::text, owner_id::text, name, secret_hash, is_active, expires_at, created_at";

fn api_key_from_row(row: ApiKeyRow) -> ApiKeyRecord {
    let (id, owner_id, name, secret_hash, is_active, expires_at, created_at) = row;
    ApiKeyRecord {
        id,
        owner_id,
        name,
        secret_hash,
        is_active,
        expires_at,
        created_at,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn require_row(rows_affected: u64) -> Result<(), AuthError> {
    if rows_affected == 0 {
        return Err(AuthError::NotFound("principal".into()));
    }
    Ok(())
}

/// Fetch a principal by normalized email.
pub async fn find_principal_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<Principal>, AuthError> {
    let row = sqlx::query_as::<_, PrincipalRow>(&format!(
        "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE lower(email) = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(principal_from_row))
}

/// Fetch a principal by ID.
pub async fn find_principal_by_id(
    pool: &PgPool,
    id: &uuid::Uuid,
) -> Result<Option<Principal>, AuthError> {
    let row = sqlx::query_as::<_, PrincipalRow>(&format!(
        "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(principal_from_row))
}

/// Insert a principal. A taken email is a validation error.
pub async fn insert_principal(
    pool: &PgPool,
    id: &uuid::Uuid,
    new: &NewPrincipal,
) -> Result<Principal, AuthError> {
    let row = sqlx::query_as::<_, PrincipalRow>(&format!(
        "INSERT INTO principals (id, email, password_hash, role, tier) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING {PRINCIPAL_COLUMNS}"
    ))
    .bind(id)
    .bind(&new.email)
    .bind(&new.password_hash)
    .bind(&new.role)
    .bind(&new.tier)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            super::principals::email_taken()
        } else {
            AuthError::DbError(e)
        }
    })?;
    Ok(principal_from_row(row))
}

/// Replace a principal's password hash.
pub async fn update_password_hash(
    pool: &PgPool,
    id: &uuid::Uuid,
    password_hash: &str,
) -> Result<(), AuthError> {
    let result = sqlx::query("UPDATE principals SET password_hash = $2 WHERE id = $1")
        .bind(id)
        .bind(password_hash)
        .execute(pool)
        .await?;
    require_row(result.rows_affected())
}

/// Mark a principal's email as verified.
pub async fn mark_principal_verified(pool: &PgPool, id: &uuid::Uuid) -> Result<(), AuthError> {
    let result = sqlx::query("UPDATE principals SET is_verified = TRUE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    require_row(result.rows_affected())
}

/// Record a successful sign-in.
pub async fn touch_last_login(
    pool: &PgPool,
    id: &uuid::Uuid,
    at: DateTime<Utc>,
) -> Result<(), AuthError> {
    let result = sqlx::query("UPDATE principals SET last_login_at = $2 WHERE id = $1")
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
    require_row(result.rows_affected())
}

/// Insert an API key. An active key with the same name for the owner is a
/// validation error (enforced by a partial unique index).
pub async fn insert_api_key(pool: &PgPool, record: &ApiKeyRecord) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO api_keys (id, owner_id, name, secret_hash, is_active, expires_at, created_at) \
         VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, $7)",
    )
    .bind(&record.id)
    .bind(&record.owner_id)
    .bind(&record.name)
    .bind(&record.secret_hash)
    .bind(record.is_active)
    .bind(record.expires_at)
    .bind(record.created_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            super::api_keys::duplicate_name(&record.name)
        } else {
            AuthError::DbError(e)
        }
    })?;
    Ok(())
}

/// Find an API key by its keyed hash.
pub async fn find_api_key_by_hash(
    pool: &PgPool,
    secret_hash: &str,
) -> Result<Option<ApiKeyRecord>, AuthError> {
    let row = sqlx::query_as::<_, ApiKeyRow>(&format!(
        "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE secret_hash = $1"
    ))
    .bind(secret_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(api_key_from_row))
}

/// Deactivate an API key. Returns whether a key of `owner_id` matched.
pub async fn deactivate_api_key(
    pool: &PgPool,
    owner_id: &uuid::Uuid,
    key_id: &uuid::Uuid,
) -> Result<bool, AuthError> {
    let result = sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE id = $1 AND owner_id = $2")
        .bind(key_id)
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// List API keys of an owner, newest first.
pub async fn list_api_keys(
    pool: &PgPool,
    owner_id: &uuid::Uuid,
) -> Result<Vec<ApiKeyRecord>, AuthError> {
    let rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
        "SELECT {API_KEY_COLUMNS} FROM api_keys \
         WHERE owner_id = $1 \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(owner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(api_key_from_row).collect())
}

/// Store a one-time token record.
pub async fn insert_one_time_token(
    pool: &PgPool,
    record: &OneTimeTokenRecord,
) -> Result<(), AuthError> {
    sqlx::query(
        "INSERT INTO one_time_tokens (token_hash, purpose, subject_email, expires_at) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&record.token_hash)
    .bind(record.purpose.as_str())
    .bind(&record.subject_email)
    .bind(record.expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Consume a one-time token in a single conditional update. Returns the
/// subject email when this call performed the consumption.
pub async fn consume_one_time_token(
    pool: &PgPool,
    token_hash: &str,
    purpose: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>, AuthError> {
    let email = sqlx::query_scalar::<_, String>(
        "UPDATE one_time_tokens SET consumed_at = $3 \
         WHERE token_hash = $1 \
           AND purpose = $2 \
           AND consumed_at IS NULL \
           AND expires_at > $3 \
         RETURNING subject_email",
    )
    .bind(token_hash)
    .bind(purpose)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(email)
}

/// Delete one-time tokens past their expiry.
pub async fn delete_expired_one_time_tokens(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<u64, AuthError> {
    let result = sqlx::query("DELETE FROM one_time_tokens WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
