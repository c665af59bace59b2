use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use super::Account;

// --- Account queries ---

pub async fn find_user_by_username(pool: &PgPool, username: &str) -> Result<Option<Account>> {
    let user = sqlx::query_as::<_, Account>(
        "SELECT * FROM users WHERE lower(username) = lower($1)"
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<Account>> {
    let user = sqlx::query_as::<_, Account>(
        "SELECT * FROM users WHERE lower(email) = lower($1)"
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<Account> {
    let id = Uuid::now_v7();
    let user = sqlx::query_as::<_, Account>(
        "INSERT INTO users (id, username, email, password_hash)
         VALUES ($1, $2, $3, $4)
         RETURNING *"
    )
    .bind(id)
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn set_user_active(pool: &PgPool, user_id: Uuid, is_active: bool) -> Result<Account> {
    let user = sqlx::query_as::<_, Account>(
        "UPDATE users SET is_active = $2 WHERE id = $1 RETURNING *"
    )
    .bind(user_id)
    .bind(is_active)
    .fetch_optional(pool)
    .await?
    .ok_or(Error::NotFound)?;
    Ok(user)
}

pub async fn list_users(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Account>> {
    let users = sqlx::query_as::<_, Account>(
        "SELECT * FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2"
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(users)
}
