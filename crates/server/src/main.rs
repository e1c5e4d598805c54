mod config;
mod hub;
mod ingest;
mod store;
mod web;

use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::store::{PgStore, Store};
use crate::web::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();
    dotenv().ok();
    let args = Args::parse();

    let config = ServerConfig::from_env(args.port)?;

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);
    let hub = Arc::new(Hub::new());
    let (queue, receiver) = ingest::channel(ingest::QUEUE_CAP);

    // Single consumer for the process lifetime: per-batch ordering of
    // broadcast and persistence depends on it staying singular.
    tokio::spawn(ingest::run_consumer(
        receiver,
        Arc::clone(&hub),
        Arc::clone(&store),
    ));

    let state = Arc::new(AppState { hub, queue, store });
    let router = web::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "relay listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
