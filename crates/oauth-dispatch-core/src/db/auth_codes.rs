use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;

// --- Authorization code queries ---

#[derive(Debug, Clone, FromRow)]
pub struct AuthorizationCodeRow {
    pub id: Uuid,
    pub code_hash: String,
    pub user_id: Uuid,
    pub application_id: Uuid,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used: bool,
}

pub async fn store_authorization_code(
    pool: &PgPool,
    code_hash: &str,
    user_id: Uuid,
    application_id: Uuid,
    redirect_uri: &str,
    scopes: &[String],
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO authorization_codes (id, code_hash, user_id, application_id, redirect_uri, scopes, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)"
    )
    .bind(Uuid::now_v7())
    .bind(code_hash)
    .bind(user_id)
    .bind(application_id)
    .bind(redirect_uri)
    .bind(scopes)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Atomically find and consume an authorization code.
/// Returns None if the code doesn't exist, is expired, or was already used.
pub async fn consume_authorization_code(
    pool: &PgPool,
    code_hash: &str,
) -> Result<Option<AuthorizationCodeRow>> {
    let row = sqlx::query_as::<_, AuthorizationCodeRow>(
        "UPDATE authorization_codes SET used = true
         WHERE code_hash = $1 AND expires_at > now() AND used = false
         RETURNING *"
    )
    .bind(code_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
