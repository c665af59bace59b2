use askama::Template;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oauth_dispatch_core::config::ScopesConfig;
use oauth_dispatch_core::consent::{ApprovalPrompt, ConsentDecision, ConsentGate};
use oauth_dispatch_core::credentials;
use oauth_dispatch_core::db::{self, Account, Application};
use oauth_dispatch_core::error::Error;
use oauth_dispatch_core::scopes::{ClientContext, GrantType, ScopePolicy, parse_scope};
use oauth_dispatch_core::token;

use super::session::{approval_form_token, current_user, verify_approval_form_token};
use crate::server::AppState;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct AuthorizeQuery {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    response_type: Option<String>,
    scope: Option<String>,
    state: Option<String>,
    approval_prompt: Option<String>,
}

#[derive(Deserialize)]
pub struct ApprovalForm {
    client_id: String,
    redirect_uri: String,
    scope: Option<String>,
    state: Option<String>,
    csrf_token: Option<String>,
    /// Present only when the user pressed "Allow".
    allow: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    grant_type: String,
    client_id: String,
    client_secret: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    username: Option<String>,
    password: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
    scope: String,
}

struct ScopeLine {
    name: String,
    description: String,
}

#[derive(Template)]
#[template(path = "authorize.html")]
struct AuthorizePage {
    application_name: String,
    scopes: Vec<ScopeLine>,
    unknown: Vec<String>,
    client_id: String,
    redirect_uri: String,
    scope: String,
    state: String,
    csrf_token: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth2/authorize/", get(authorize).post(approve))
        .route("/oauth2/access_token/", post(access_token))
}

/// GET /oauth2/authorize/: authorization endpoint
async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
    jar: CookieJar,
) -> Result<Response, Error> {
    let account = current_user(&state, &jar).await?;

    let client = load_client(&state, query.client_id.as_deref()).await?;
    let redirect_uri = resolve_redirect_uri(&client.application, query.redirect_uri.as_deref())?;

    match query.response_type.as_deref() {
        Some("code") => {}
        other => {
            return Err(Error::UnsupportedResponseType(
                other.unwrap_or_default().to_string(),
            ));
        }
    }

    let requested = requested_scopes(
        &state.scope_policy,
        &client,
        query.scope.as_deref(),
        GrantType::AuthorizationCode,
    );
    let prompt = ApprovalPrompt::parse(query.approval_prompt.as_deref());
    let oauth_state = non_empty(query.state.as_deref());

    let gate = ConsentGate::new(&state.config.scopes, &state.scope_policy);
    match gate
        .decide(&state.db, &account, &client, &requested, prompt)
        .await?
    {
        ConsentDecision::RedirectWithCode => {
            let granted = state
                .scope_policy
                .select(&requested, &state.config.scopes, &client)
                .granted;
            issue_code(&state, &account, &client.application, &redirect_uri, &granted, oauth_state)
                .await
        }
        ConsentDecision::ShowConsent { pending, unknown } => {
            let page = approval_page(
                &state.config.scopes,
                &client,
                &redirect_uri,
                &requested,
                &pending,
                unknown,
                oauth_state,
                approval_form_token(&state, &jar)?,
            );
            let html = page.render().map_err(anyhow::Error::from)?;
            Ok((
                [
                    (header::X_FRAME_OPTIONS, "DENY"),
                    (header::CONTENT_SECURITY_POLICY, "frame-ancestors 'none'"),
                ],
                Html(html),
            )
                .into_response())
        }
    }
}

/// POST /oauth2/authorize/: the approval form
async fn approve(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<ApprovalForm>,
) -> Result<Response, Error> {
    let account = current_user(&state, &jar).await?;
    if let Err(e) = verify_approval_form_token(&state, &jar, form.csrf_token.as_deref()) {
        tracing::warn!(
            user_id = %account.id,
            client_id = %form.client_id,
            "approval post with missing or invalid CSRF token"
        );
        return Err(e);
    }

    let client = load_client(&state, Some(&form.client_id)).await?;
    let redirect_uri = resolve_redirect_uri(&client.application, Some(&form.redirect_uri))?;
    let oauth_state = non_empty(form.state.as_deref());

    if form.allow.is_none() {
        tracing::info!(
            user_id = %account.id,
            client_id = %client.application.client_id,
            "authorization denied by user"
        );
        let location = redirect_location(&redirect_uri, ("error", "access_denied"), oauth_state)?;
        return Ok(found(location));
    }

    let requested = requested_scopes(
        &state.scope_policy,
        &client,
        form.scope.as_deref(),
        GrantType::AuthorizationCode,
    );
    let granted = state
        .scope_policy
        .select(&requested, &state.config.scopes, &client)
        .granted;

    issue_code(&state, &account, &client.application, &redirect_uri, &granted, oauth_state).await
}

/// POST /oauth2/access_token/: token endpoint
async fn access_token(
    State(state): State<AppState>,
    Form(body): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, Error> {
    let grant_type = GrantType::parse(&body.grant_type)
        .ok_or_else(|| Error::UnsupportedGrantType(body.grant_type.clone()))?;

    let client = load_client(&state, Some(&body.client_id)).await?;
    authenticate_client(&client.application, body.client_secret.as_deref())?;

    let (user_id, scopes) = match grant_type {
        GrantType::AuthorizationCode => {
            let code = body.code.as_deref().ok_or(Error::InvalidGrant)?;

            let auth_code = db::consume_authorization_code(&state.db, &token::hash_token(code))
                .await?
                .ok_or(Error::InvalidAuthorizationCode)?;

            if auth_code.application_id != client.application.id {
                return Err(Error::InvalidGrant);
            }
            if !redeems_redirect_uri(
                &client.application,
                body.redirect_uri.as_deref(),
                &auth_code.redirect_uri,
            ) {
                return Err(Error::InvalidGrant);
            }

            (auth_code.user_id, auth_code.scopes)
        }
        GrantType::Password => {
            let username = body
                .username
                .as_deref()
                .ok_or_else(|| Error::BadRequest("username is required".to_string()))?;
            let password = body
                .password
                .as_deref()
                .ok_or_else(|| Error::BadRequest("password is required".to_string()))?;

            // Disabled accounts may still obtain tokens here.
            let account = credentials::resolve_and_verify(&state.db, username, password)
                .await?
                .ok_or(Error::InvalidGrant)?;

            let scopes = token_scopes(&state, &client, grant_type, body.scope.as_deref())?;
            (account.id, scopes)
        }
        GrantType::ClientCredentials => {
            if !client.application.is_confidential() {
                return Err(Error::UnauthorizedClient(
                    "client_credentials requires a confidential client".to_string(),
                ));
            }
            let scopes = token_scopes(&state, &client, grant_type, body.scope.as_deref())?;
            (client.application.user_id, scopes)
        }
    };

    let response = issue_access_token(&state, user_id, &client.application, &scopes).await?;
    tracing::info!(
        %user_id,
        client_id = %client.application.client_id,
        grant_type = grant_type.as_str(),
        scope = %response.scope,
        "access token issued"
    );
    Ok(Json(response))
}

// --- Helpers ---

async fn load_client(state: &AppState, client_id: Option<&str>) -> Result<ClientContext, Error> {
    let client_id = non_empty(client_id).ok_or(Error::InvalidClient)?;
    let application = db::find_application_by_client_id(&state.db, client_id)
        .await?
        .ok_or(Error::InvalidClient)?;
    let access = db::find_application_access(&state.db, application.id).await?;
    Ok(ClientContext {
        application,
        access,
    })
}

/// An omitted redirect URI is only acceptable when exactly one is registered.
fn resolve_redirect_uri(application: &Application, requested: Option<&str>) -> Result<String, Error> {
    match non_empty(requested) {
        Some(uri) if application.redirect_uris.iter().any(|r| r == uri) => Ok(uri.to_string()),
        Some(_) => Err(Error::InvalidRedirectUri),
        None => match application.redirect_uris.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(Error::InvalidRedirectUri),
        },
    }
}

/// The redirect URI sent with a code exchange must be the one the code was
/// issued for. It may be left out only when a single URI is registered.
fn redeems_redirect_uri(application: &Application, presented: Option<&str>, issued_for: &str) -> bool {
    let presented = match non_empty(presented) {
        Some(uri) => uri,
        None => match application.redirect_uris.as_slice() {
            [only] => only.as_str(),
            _ => return false,
        },
    };
    presented == issued_for
}

/// Confidential clients must present their secret; public clients present none.
fn authenticate_client(application: &Application, secret: Option<&str>) -> Result<(), Error> {
    match (application.client_secret_hash.as_deref(), non_empty(secret)) {
        (None, _) => Ok(()),
        (Some(hash), Some(secret)) if token::secret_matches(secret, hash) => Ok(()),
        (Some(_), _) => Err(Error::InvalidClient),
    }
}

fn requested_scopes(
    policy: &ScopePolicy,
    client: &ClientContext,
    raw: Option<&str>,
    grant_type: GrantType,
) -> Vec<String> {
    let requested = parse_scope(raw.unwrap_or_default());
    if requested.is_empty() {
        policy.effective_default_scopes(grant_type, Some(client), None)
    } else {
        requested
    }
}

/// Scopes for a directly issued token. Naming a scope that cannot be granted
/// fails the request instead of silently narrowing it.
fn token_scopes(
    state: &AppState,
    client: &ClientContext,
    grant_type: GrantType,
    raw: Option<&str>,
) -> Result<Vec<String>, Error> {
    let requested = parse_scope(raw.unwrap_or_default());
    if requested.is_empty() {
        return Ok(state
            .scope_policy
            .effective_default_scopes(grant_type, Some(client), None));
    }

    let selection = state
        .scope_policy
        .select(&requested, &state.config.scopes, client);
    if !selection.rejected.is_empty() {
        return Err(Error::InvalidScope(selection.rejected.join(" ")));
    }
    Ok(selection.granted)
}

async fn issue_code(
    state: &AppState,
    account: &Account,
    application: &Application,
    redirect_uri: &str,
    scopes: &[String],
    oauth_state: Option<&str>,
) -> Result<Response, Error> {
    let (code, code_hash) = token::generate_token();
    let expires_at =
        Utc::now() + Duration::seconds(state.config.tokens.authorization_code_ttl_secs as i64);

    db::store_authorization_code(
        &state.db,
        &code_hash,
        account.id,
        application.id,
        redirect_uri,
        scopes,
        expires_at,
    )
    .await?;

    tracing::info!(
        user_id = %account.id,
        client_id = %application.client_id,
        scope = %scopes.join(" "),
        "authorization code issued"
    );

    let location = redirect_location(redirect_uri, ("code", code.as_str()), oauth_state)?;
    Ok(found(location))
}

async fn issue_access_token(
    state: &AppState,
    user_id: Uuid,
    application: &Application,
    scopes: &[String],
) -> Result<TokenResponse, Error> {
    let now = Utc::now();
    let expires_at = token_expiry(
        application,
        now,
        state.config.tokens.access_token_ttl_secs,
    );

    let (raw, hash) = token::generate_token();
    db::store_access_token(&state.db, user_id, application.id, &hash, scopes, expires_at).await?;

    Ok(TokenResponse {
        access_token: raw,
        token_type: "Bearer",
        expires_in: (expires_at - now).num_seconds().max(0),
        scope: scopes.join(" "),
    })
}

/// Restricted applications receive tokens that are already expired.
fn token_expiry(application: &Application, now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    if application.restricted {
        DateTime::<Utc>::UNIX_EPOCH
    } else {
        now + Duration::seconds(ttl_secs as i64)
    }
}

#[allow(clippy::too_many_arguments)]
fn approval_page(
    known: &ScopesConfig,
    client: &ClientContext,
    redirect_uri: &str,
    requested: &[String],
    pending: &[String],
    unknown: Vec<String>,
    oauth_state: Option<&str>,
    csrf_token: String,
) -> AuthorizePage {
    let scopes = pending
        .iter()
        .filter_map(|name| {
            known.describe(name).map(|description| ScopeLine {
                name: name.clone(),
                description: description.to_string(),
            })
        })
        .collect();

    AuthorizePage {
        application_name: client.application.name.clone(),
        scopes,
        unknown,
        client_id: client.application.client_id.clone(),
        redirect_uri: redirect_uri.to_string(),
        scope: requested.join(" "),
        state: oauth_state.unwrap_or_default().to_string(),
        csrf_token,
    }
}

fn redirect_location(
    redirect_uri: &str,
    pair: (&str, &str),
    oauth_state: Option<&str>,
) -> Result<String, Error> {
    let mut url = url::Url::parse(redirect_uri).map_err(|_| Error::InvalidRedirectUri)?;
    {
        let mut params = url.query_pairs_mut();
        params.append_pair(pair.0, pair.1);
        if let Some(oauth_state) = oauth_state {
            params.append_pair("state", oauth_state);
        }
    }
    Ok(url.into())
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
