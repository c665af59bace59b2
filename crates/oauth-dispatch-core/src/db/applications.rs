use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use super::{Application, ApplicationAccess};

/// Fields for registering an application.
#[derive(Debug, Clone)]
pub struct NewApplication<'a> {
    pub name: &'a str,
    pub client_id: &'a str,
    /// `None` registers a public client.
    pub client_secret_hash: Option<&'a str>,
    pub owner_id: Uuid,
    pub redirect_uris: &'a [String],
    pub skip_authorization: bool,
    pub restricted: bool,
}

pub async fn find_application_by_client_id(
    pool: &PgPool,
    client_id: &str,
) -> Result<Option<Application>> {
    let app = sqlx::query_as::<_, Application>(
        "SELECT * FROM oauth_applications WHERE client_id = $1"
    )
    .bind(client_id)
    .fetch_optional(pool)
    .await?;
    Ok(app)
}

pub async fn list_applications(pool: &PgPool) -> Result<Vec<Application>> {
    let apps = sqlx::query_as::<_, Application>(
        "SELECT * FROM oauth_applications ORDER BY created_at DESC"
    )
    .fetch_all(pool)
    .await?;
    Ok(apps)
}

pub async fn create_application(pool: &PgPool, new: &NewApplication<'_>) -> Result<Application> {
    let client_type = if new.client_secret_hash.is_some() {
        super::CLIENT_TYPE_CONFIDENTIAL
    } else {
        super::CLIENT_TYPE_PUBLIC
    };
    let app = sqlx::query_as::<_, Application>(
        "INSERT INTO oauth_applications
            (id, name, client_id, client_secret_hash, client_type, user_id, redirect_uris, skip_authorization, restricted)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *"
    )
    .bind(Uuid::now_v7())
    .bind(new.name)
    .bind(new.client_id)
    .bind(new.client_secret_hash)
    .bind(client_type)
    .bind(new.owner_id)
    .bind(new.redirect_uris)
    .bind(new.skip_authorization)
    .bind(new.restricted)
    .fetch_one(pool)
    .await?;
    Ok(app)
}

pub async fn delete_application(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM oauth_applications WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// --- Application access ---

pub async fn find_application_access(
    pool: &PgPool,
    application_id: Uuid,
) -> Result<Option<ApplicationAccess>> {
    let access = sqlx::query_as::<_, ApplicationAccess>(
        "SELECT * FROM application_access WHERE application_id = $1"
    )
    .bind(application_id)
    .fetch_optional(pool)
    .await?;
    Ok(access)
}

/// Replace the extra scopes an application may receive.
pub async fn set_application_access(
    pool: &PgPool,
    application_id: Uuid,
    scopes: &[String],
) -> Result<ApplicationAccess> {
    let access = sqlx::query_as::<_, ApplicationAccess>(
        "INSERT INTO application_access (application_id, scopes)
         VALUES ($1, $2)
         ON CONFLICT (application_id) DO UPDATE SET scopes = EXCLUDED.scopes
         RETURNING *"
    )
    .bind(application_id)
    .bind(scopes)
    .fetch_one(pool)
    .await?;
    Ok(access)
}
