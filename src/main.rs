use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use dynapi::config::Config;
use dynapi::db::PgConnector;
use dynapi::server::{build_router, AppState};

/// Serve parameterized SQL templates as HTTP endpoints
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Listen address, overrides `bind` from the config file
    #[arg(long = "bind")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dynapi=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let connector = Arc::new(PgConnector::new(config.pool_max_size, config.tls.clone()));
    let state = Arc::new(AppState::from_config(&config, connector));

    for seed in &config.datasources {
        state
            .executor
            .datasources()
            .add(&seed.id, &seed.uri)
            .with_context(|| format!("failed to add datasource '{}'", seed.id))?;
    }

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind))?;
    tracing::info!(
        materialization = ?config.materialization,
        overwrite_policy = ?config.overwrite_policy,
        "dynapi listening on {}",
        config.bind
    );

    axum::serve(listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.executor.datasources().shutdown();
    tracing::info!("dynapi stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
