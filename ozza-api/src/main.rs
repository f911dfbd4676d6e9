//! # Ozza API Server
//!
//! Serves the JSON API for coaches, agencies, clients and the admin console.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/ozza JWT_SECRET=... cargo run -p ozza-api
//! ```
//!
//! `LOG_FORMAT=json` switches to JSON log lines; `RUST_LOG` overrides the
//! default filter.

use ozza_api::{
    app::{build_router, AppState},
    config::Config,
    sweeper::InvitationSweeper,
};
use ozza_shared::db::{
    migrations::run_migrations,
    pool::{close_pool, create_pool, DatabaseConfig},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ozza_api=debug,ozza_shared=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Ozza API v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let mut db_config = DatabaseConfig::from_url(config.database.url.clone());
    db_config.max_connections = config.database.max_connections;
    let pool = create_pool(db_config).await?;
    run_migrations(&pool).await?;

    let shutdown = CancellationToken::new();
    let sweeper = InvitationSweeper::new(
        pool.clone(),
        config.invitations.sweep_interval(),
        shutdown.clone(),
    )
    .spawn();

    let bind_address = config.bind_address();
    let state = AppState::new(pool.clone(), config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Invitation sweeper panicked");
    }

    close_pool(pool).await;
    tracing::info!("Server stopped");

    Ok(())
}
