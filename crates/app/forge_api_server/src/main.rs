//! Forge API server binary.
//!
//! Serves the auth, generation and history endpoints over PostgreSQL, or
//! over an in-memory store with `--in-memory`.

use std::sync::Arc;

use clap::Parser;
use forge_api::AppState;
use forge_api::config::ApiConfig;
use forge_core::generation::OpenAiClient;
use forge_core::store::{MemoryStore, PgStore};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "forge_api_server", about = "Forge code generation API server")]
struct Args {
    /// Port to listen on. Overrides the port in `BIND_ADDR`.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Keep users and runs in memory instead of PostgreSQL.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,forge_api=debug,forge_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host);
        config.bind_addr = format!("{host}:{port}");
    }

    let api_key = config
        .generation
        .api_key
        .clone()
        .ok_or("OPENAI_API_KEY is not set")?;
    let client = Arc::new(OpenAiClient::new(&config.generation.base_url, api_key)?);

    info!(
        bind_addr = %config.bind_addr,
        model = %config.generation.model,
        in_memory = args.in_memory,
        "starting forge_api_server"
    );

    let state = if args.in_memory {
        warn!("in-memory store: users and runs are lost on exit");
        let store = MemoryStore::with_retention(config.auth.lockout_window);
        AppState::new(config.clone(), Arc::new(store), client)?
    } else {
        info!(max_connections = args.max_connections, "configuring connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&config.database_url)
            .await?;

        info!("running database migrations");
        forge_api::migrate(&pool).await?;

        AppState::new(config.clone(), Arc::new(PgStore::new(pool)), client)?
    };

    let app = forge_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
            }
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
