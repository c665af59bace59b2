use crate::db::Account;
use crate::error::Result;
use crate::store::CredentialStore;

/// Resolve `identifier` as a username, falling back to an email address, and
/// check `secret` against the matched account.
///
/// The account's active flag is not consulted: disabled accounts still pass
/// the password-grant check. Interactive login enforces the flag on its own.
/// No match and a wrong secret both come back as `Ok(None)`.
pub async fn resolve_and_verify<S>(
    store: &S,
    identifier: &str,
    secret: &str,
) -> Result<Option<Account>>
where
    S: CredentialStore + ?Sized,
{
    if identifier.is_empty() {
        return Ok(None);
    }

    let account = match store.find_by_username(identifier).await? {
        Some(account) => Some(account),
        None => store.find_by_email(identifier).await?,
    };

    let Some(account) = account else {
        tracing::debug!("no account matches login identifier");
        return Ok(None);
    };

    if store.verify_secret(&account, secret) {
        Ok(Some(account))
    } else {
        tracing::debug!(user_id = %account.id, "password mismatch");
        Ok(None)
    }
}

/// Password-grant user validation hook.
pub async fn validate_user<S>(store: &S, identifier: &str, secret: &str) -> Result<bool>
where
    S: CredentialStore + ?Sized,
{
    Ok(resolve_and_verify(store, identifier, secret).await?.is_some())
}
