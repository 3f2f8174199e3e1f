use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod config;
mod context;
mod db;
mod state;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config.log_env);
    info!(
        service = %config.service_name,
        env = %config.log_env,
        port = config.server.port,
        token_ttl_minutes = config.jwt.ttl_minutes,
        refresh_ttl_minutes = config.jwt.refresh_ttl_minutes,
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let app_state = AppState::init(config, shutdown.clone()).await?;
    let server_config = app_state.config.server.clone();
    let app = app::build_app(app_state);

    tokio::spawn(shutdown_signal(shutdown.clone()));
    app::serve(app, &server_config, shutdown).await?;

    info!("gracefully stopped");
    Ok(())
}

/// `local`: human-readable debug output. `dev`/`prod`: JSON at debug/info.
/// Any other environment (e.g. `test`) logs nothing unless `RUST_LOG` is set.
fn init_tracing(log_env: &str) {
    let level = match log_env {
        "local" | "dev" => "debug",
        "prod" => "info",
        _ => "off",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("authkeeper={level},tower_http={level}"))
    });

    if log_env == "local" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .pretty()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
