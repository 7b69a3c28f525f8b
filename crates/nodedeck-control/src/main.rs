use std::path::Path;

use anyhow::Context;
use nodedeck_control::config::Config;
use nodedeck_control::state::AppState;
use sea_orm_migration::MigratorTrait;

fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "nodedeck.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(EnvFilter::from_default_env())
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());
    if std::env::var_os("NODEDECK_JWT_SECRET").is_none() {
        tracing::warn!("NODEDECK_JWT_SECRET not set; sessions will not survive a restart");
    }

    tokio::fs::create_dir_all(&config.data_root)
        .await
        .with_context(|| format!("create data root {}", config.data_root.display()))?;

    let db = nodedeck_db::connect(&config.database_url)
        .await
        .context("connect database")?;
    // Apply migrations on boot (idempotent).
    nodedeck_migration::Migrator::up(&db, None)
        .await
        .context("apply migrations")?;

    let state = AppState::new(config, db);
    state.lifecycle.reset_stale_on_boot().await?;
    state.lifecycle.spawn_reconciler();

    let app = nodedeck_control::router(state.clone());
    let addr = state.config.bind;
    tracing::info!(%addr, data_root = %state.config.data_root.display(), "nodedeck-control HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("stopping all processes");
    state.registry.shutdown_all(state.config.stop_timeout).await;
    Ok(())
}
