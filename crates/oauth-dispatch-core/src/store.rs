//! Read-only boundaries the decision components depend on.
//!
//! Both are implemented for [`PgPool`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{self, AccessToken, Account};
use crate::error::Result;
use crate::password;

/// Account lookup and password checking.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Check `secret` against the account's stored hash. Says nothing about
    /// whether the account may log in.
    fn verify_secret(&self, account: &Account, secret: &str) -> bool;
}

/// Previously issued access tokens.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// All tokens for (account, application), expired ones included.
    async fn tokens_for(&self, account_id: Uuid, application_id: Uuid) -> Result<Vec<AccessToken>>;
}

#[async_trait]
impl CredentialStore for PgPool {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        db::find_user_by_username(self, username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        db::find_user_by_email(self, email).await
    }

    fn verify_secret(&self, account: &Account, secret: &str) -> bool {
        password::verify_password(secret, &account.password_hash)
    }
}

#[async_trait]
impl TokenLedger for PgPool {
    async fn tokens_for(&self, account_id: Uuid, application_id: Uuid) -> Result<Vec<AccessToken>> {
        db::find_tokens_for_user_and_application(self, account_id, application_id).await
    }
}
