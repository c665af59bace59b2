use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use oauth_dispatch_core::error::Error;

pub mod oauth_provider;
pub mod session;

use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// CSRF protection: require `X-Requested-With` header on non-safe HTTP methods.
/// Simple form submissions and cross-origin requests cannot set custom headers
/// without a CORS preflight.
async fn require_csrf_header(
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Error> {
    let unsafe_method = matches!(
        *request.method(),
        axum::http::Method::POST
            | axum::http::Method::PATCH
            | axum::http::Method::PUT
            | axum::http::Method::DELETE
    );
    if unsafe_method && !request.headers().contains_key("x-requested-with") {
        return Err(Error::BadRequest("missing X-Requested-With header".to_string()));
    }
    Ok(next.run(request).await)
}

/// Build the application router.
///
/// The OAuth endpoints sit outside the CSRF layer: the approval form is a
/// plain HTML post that carries a session-bound form token instead, and the
/// token endpoint is called server-to-server.
pub fn router() -> Router<AppState> {
    let csrf_protected = Router::new()
        .merge(session::router())
        .layer(middleware::from_fn(require_csrf_header));

    Router::new()
        .route("/health", get(health))
        .merge(csrf_protected)
        .merge(oauth_provider::router())
}
