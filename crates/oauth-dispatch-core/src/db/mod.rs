use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, FromRow, PgPool};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

mod applications;
mod auth_codes;
mod sessions;
mod tokens;
mod users;

pub use applications::*;
pub use auth_codes::*;
pub use sessions::*;
pub use tokens::*;
pub use users::*;

// --- Connection ---

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config.url.resolve()?;
    let mut opts = PgPoolOptions::new().max_connections(config.max_connections);

    if let Some(schema) = &config.schema {
        // Only plain identifiers may be interpolated into the SET statement.
        if schema.is_empty()
            || schema.starts_with(|c: char| c.is_ascii_digit())
            || !schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Config(format!(
                "invalid schema name '{}': must match [a-zA-Z_][a-zA-Z0-9_]*",
                schema
            )));
        }
        let schema = schema.clone();
        opts = opts.after_connect(move |conn, _meta| {
            let schema = schema.clone();
            Box::pin(async move {
                conn.execute(format!("SET search_path TO \"{}\"", schema).as_str())
                    .await?;
                Ok(())
            })
        });
    }

    let pool = opts.connect(&url).await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

// --- Models ---

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub const CLIENT_TYPE_CONFIDENTIAL: &str = "confidential";
pub const CLIENT_TYPE_PUBLIC: &str = "public";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Application {
    pub id: Uuid,
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    pub client_type: String,
    /// Owning account. Client-credentials tokens are issued to this user.
    pub user_id: Uuid,
    pub redirect_uris: Vec<String>,
    pub skip_authorization: bool,
    /// Restricted applications get expired tokens and skip consent whenever
    /// any earlier token already covered the requested scopes.
    pub restricted: bool,
    pub created_at: DateTime<Utc>,
}

impl Application {
    pub fn is_confidential(&self) -> bool {
        self.client_type == CLIENT_TYPE_CONFIDENTIAL
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApplicationAccess {
    pub application_id: Uuid,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AccessToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub application_id: Uuid,
    pub token_hash: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True when every name in `scopes` was granted to this token.
    pub fn covers<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        scopes
            .iter()
            .all(|s| self.scopes.iter().any(|granted| granted == s.as_ref()))
    }
}

// --- Cleanup ---
//
// Access tokens are never deleted: the consent gate reads expired ones for
// restricted applications.

/// Delete expired authorization codes in batches of 1000.
pub async fn cleanup_expired_auth_codes(pool: &PgPool) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let result = sqlx::query(
            "DELETE FROM authorization_codes WHERE id IN (
                SELECT id FROM authorization_codes WHERE expires_at <= now() LIMIT 1000
            )"
        )
        .execute(pool)
        .await?;
        let affected = result.rows_affected();
        total += affected;
        if affected < 1000 { break; }
    }
    Ok(total)
}

/// Delete expired login sessions in batches of 1000.
pub async fn cleanup_expired_sessions(pool: &PgPool) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE id IN (
                SELECT id FROM sessions WHERE expires_at <= now() LIMIT 1000
            )"
        )
        .execute(pool)
        .await?;
        let affected = result.rows_affected();
        total += affected;
        if affected < 1000 { break; }
    }
    Ok(total)
}
