use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Json, Router};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use oauth_dispatch_core::config::Config;
use oauth_dispatch_core::credentials;
use oauth_dispatch_core::db::{self, Account};
use oauth_dispatch_core::error::Error;
use oauth_dispatch_core::token;

use crate::server::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Username or email address.
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    id: String,
    username: String,
    email: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

/// POST /login: start an interactive session
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(body): Form<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), Error> {
    let account = credentials::resolve_and_verify(&state.db, &body.username, &body.password)
        .await?
        .ok_or_else(|| {
            tracing::info!("interactive login rejected");
            Error::InvalidCredentials
        })?;

    // The password grant lets disabled accounts through; browser sessions do not.
    if !account.is_active {
        tracing::info!(user_id = %account.id, "login attempt for disabled account");
        return Err(Error::AccountDisabled);
    }

    let (raw, hash) = token::generate_token();
    let expires_at = Utc::now() + Duration::seconds(state.config.tokens.session_ttl_secs as i64);
    db::create_session(&state.db, account.id, &hash, expires_at).await?;

    let jar = jar.add(build_session_cookie(
        &state.cookie_names.session,
        &raw,
        &state.config,
    ));

    Ok((
        jar,
        Json(LoginResponse {
            id: account.id.to_string(),
            username: account.username,
            email: account.email,
        }),
    ))
}

/// POST /logout: end the session and clear the cookie
async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), Error> {
    if let Some(session) = jar.get(&state.cookie_names.session) {
        let hash = token::hash_token(session.value());
        db::delete_session(&state.db, &hash).await?;
    }

    let jar = jar.remove(Cookie::from(state.cookie_names.session.clone()));
    Ok((jar, StatusCode::OK))
}

const APPROVAL_FORM: &str = "oauth2-approve";

/// The account behind the request's session cookie.
pub(crate) async fn current_user(state: &AppState, jar: &CookieJar) -> Result<Account, Error> {
    let raw = session_token(state, jar)?;
    db::find_session_user(&state.db, &token::hash_token(raw))
        .await?
        .ok_or(Error::InvalidToken)
}

/// Token the approval form must send back, bound to the current session.
pub(crate) fn approval_form_token(state: &AppState, jar: &CookieJar) -> Result<String, Error> {
    Ok(token::form_token(session_token(state, jar)?, APPROVAL_FORM))
}

/// Reject an approval post whose form token does not belong to this session.
pub(crate) fn verify_approval_form_token(
    state: &AppState,
    jar: &CookieJar,
    presented: Option<&str>,
) -> Result<(), Error> {
    let raw = session_token(state, jar)?;
    match presented {
        Some(presented) if token::form_token_matches(presented, raw, APPROVAL_FORM) => Ok(()),
        _ => Err(Error::BadRequest("invalid CSRF token".to_string())),
    }
}

fn session_token<'j>(state: &AppState, jar: &'j CookieJar) -> Result<&'j str, Error> {
    jar.get(&state.cookie_names.session)
        .map(|c| c.value())
        .ok_or(Error::Unauthenticated)
}

fn build_session_cookie(name: &str, value: &str, config: &Config) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value.to_string());
    cookie.set_http_only(true);
    cookie.set_secure(config.server.secure_cookies);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    if let Some(ref domain) = config.server.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie.set_max_age(cookie::time::Duration::seconds(
        config.tokens.session_ttl_secs as i64,
    ));
    cookie
}
