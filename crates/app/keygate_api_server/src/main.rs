//! Keygate API server binary.
//!
//! Connects to PostgreSQL, applies migrations and serves the HTTP API until
//! interrupted.

use std::net::SocketAddr;

use clap::Parser;
use keygate_api::{AppState, config::ApiConfig};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "keygate_api_server", about = "Keygate API server")]
struct Args {
    /// Port to listen on; when unset `BIND_ADDR` is used as is.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/keygate"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Skip running migrations at startup.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,keygate_api=debug,keygate_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    info!(
        max_connections = args.max_connections,
        "configuring connection pool"
    );
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    if args.skip_migrations {
        warn!("skipping database migrations");
    } else {
        info!("running database migrations");
        keygate_api::migrate(&pool).await?;
    }

    let mut config = ApiConfig {
        pg_connection_url: args.database_url,
        ..ApiConfig::from_env()
    };
    if let Some(port) = args.port {
        config.bind_addr = format!("127.0.0.1:{port}");
    }
    if config.twilio.is_none() {
        warn!("twilio not configured, sms codes will only be logged");
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, env = %config.env_name, "REST API listening");

    let app = keygate_api::router(AppState::postgres(config, pool));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
