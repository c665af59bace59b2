use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use oauth_dispatch_core::config::Config;
use oauth_dispatch_core::maintenance;
use oauth_dispatch_core::scopes::ScopePolicy;

use crate::routes;

/// Cookie names derived from the configurable prefix.
#[derive(Clone, Debug)]
pub struct CookieNames {
    pub session: String,
}

impl CookieNames {
    pub fn from_prefix(prefix: &str) -> Self {
        Self {
            session: format!("{prefix}_session"),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub scope_policy: Arc<ScopePolicy>,
    pub cookie_names: CookieNames,
}

impl AppState {
    pub fn new(config: Config, db: PgPool) -> Self {
        let cookie_names = CookieNames::from_prefix(&config.server.cookie_prefix);
        let scope_policy = ScopePolicy::from_config(&config);
        Self {
            config: Arc::new(config),
            db,
            scope_policy: Arc::new(scope_policy),
            cookie_names,
        }
    }
}

pub async fn serve(config: Config, db: PgPool) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    let cors = build_cors(&config);
    let cleanup_interval =
        std::time::Duration::from_secs(config.maintenance.cleanup_interval_secs);
    let state = AppState::new(config, db.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(maintenance::maintenance_worker(
        db,
        cleanup_interval,
        shutdown_rx,
    ));

    let app = Router::new()
        .merge(routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(%addr, "starting server");
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "maintenance worker panicked");
    }

    Ok(())
}

fn build_cors(config: &Config) -> CorsLayer {
    let origins = &config.server.cors_origins;
    if origins.is_empty() {
        tracing::warn!("no cors_origins configured, using permissive CORS (not safe for production)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-requested-with"),
            ])
            .allow_credentials(true)
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    ctrl_c.await.ok();
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => tracing::info!("received CTRL+C"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received CTRL+C");
    }
}
