use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Config
    #[error("config not found (searched: {searched:?})")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("config parse error in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    // Database
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Auth
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("missing authentication")]
    Unauthenticated,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is disabled")]
    AccountDisabled,

    // OAuth client
    #[error("invalid client")]
    InvalidClient,

    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),

    #[error("invalid redirect URI")]
    InvalidRedirectUri,

    #[error("invalid authorization code")]
    InvalidAuthorizationCode,

    #[error("invalid grant")]
    InvalidGrant,

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    // General
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::Config(_)
            | Self::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::InvalidToken | Self::Unauthenticated | Self::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccountDisabled => StatusCode::FORBIDDEN,

            Self::InvalidClient => StatusCode::UNAUTHORIZED,

            Self::UnauthorizedClient(_)
            | Self::InvalidRedirectUri
            | Self::InvalidAuthorizationCode
            | Self::InvalidGrant
            | Self::UnsupportedGrantType(_)
            | Self::UnsupportedResponseType(_)
            | Self::InvalidScope(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,

            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// User-facing error code (short, stable string). OAuth errors use the
    /// RFC 6749 codes.
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::ConfigParse { .. } => "config_parse_error",
            Self::Config(_) => "config_error",
            Self::Database(_) => "internal_error",
            Self::Migration(_) => "migration_error",
            Self::InvalidToken => "invalid_token",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountDisabled => "account_disabled",
            Self::InvalidClient => "invalid_client",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::InvalidRedirectUri => "invalid_redirect_uri",
            Self::InvalidAuthorizationCode | Self::InvalidGrant => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::BadRequest(_) => "invalid_request",
            Self::NotFound => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal errors, don't expose details to client
        let detail = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            None
        } else {
            Some(self.to_string())
        };

        let body = ErrorBody {
            error: self.error_code().to_string(),
            detail,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
