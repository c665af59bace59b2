use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use super::AccessToken;

// --- Access token queries ---

pub async fn store_access_token(
    pool: &PgPool,
    user_id: Uuid,
    application_id: Uuid,
    token_hash: &str,
    scopes: &[String],
    expires_at: DateTime<Utc>,
) -> Result<AccessToken> {
    let token = sqlx::query_as::<_, AccessToken>(
        "INSERT INTO access_tokens (id, user_id, application_id, token_hash, scopes, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *"
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(application_id)
    .bind(token_hash)
    .bind(scopes)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;
    Ok(token)
}

/// Every token ever issued to (user, application), expired ones included.
pub async fn find_tokens_for_user_and_application(
    pool: &PgPool,
    user_id: Uuid,
    application_id: Uuid,
) -> Result<Vec<AccessToken>> {
    let tokens = sqlx::query_as::<_, AccessToken>(
        "SELECT * FROM access_tokens
         WHERE user_id = $1 AND application_id = $2
         ORDER BY created_at DESC"
    )
    .bind(user_id)
    .bind(application_id)
    .fetch_all(pool)
    .await?;
    Ok(tokens)
}

pub async fn delete_tokens_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM access_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
