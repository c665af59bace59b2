use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::db;

/// Periodically purge expired authorization codes and login sessions until
/// `shutdown` flips to true.
pub async fn maintenance_worker(
    pool: PgPool,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "maintenance worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        run_cleanup(&pool).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("maintenance worker stopped");
}

async fn run_cleanup(pool: &PgPool) {
    match db::cleanup_expired_auth_codes(pool).await {
        Ok(0) => {}
        Ok(n) => info!(deleted = n, "removed expired authorization codes"),
        Err(e) => warn!(error = %e, "authorization code cleanup failed"),
    }
    match db::cleanup_expired_sessions(pool).await {
        Ok(0) => {}
        Ok(n) => info!(deleted = n, "removed expired sessions"),
        Err(e) => warn!(error = %e, "session cleanup failed"),
    }
}
