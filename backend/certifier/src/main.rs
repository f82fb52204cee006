//! CO₂ Certification Service — entry point.
//!
//! Hosts the certification workflow engine over SQLite, exposes it through a
//! small Axum REST API, and runs a background worker that finishes ledger
//! recordings left behind by failed commits.

mod api;
mod config;
mod db;
mod errors;
mod rpc;
mod worker;

use std::sync::Arc;

use co2_engine::{EngineConfig, HashLedger, LedgerClient, SystemClock, WorkflowEngine};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use db::{SqliteActivityStore, SqliteProjectRepository};
use rpc::RpcLedgerClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;

    let ledger: Arc<dyn LedgerClient> = match &config.ledger_rpc_url {
        Some(url) => {
            info!("Recording to ledger RPC at {url}");
            let client = Client::builder().timeout(config.ledger_timeout).build()?;
            Arc::new(RpcLedgerClient::new(client, url.clone()))
        }
        None => {
            info!("No LEDGER_RPC_URL set; recording with the local hash ledger");
            Arc::new(HashLedger)
        }
    };

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(SqliteProjectRepository::new(pool.clone())),
        Arc::new(SqliteActivityStore::new(pool)),
        ledger,
        Arc::new(SystemClock),
        EngineConfig {
            commit_timeout: config.ledger_timeout,
        },
    ));

    // ─── Background recording worker ──────────────────────
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(worker::run(
        engine.clone(),
        config.retry_interval,
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState { engine }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    worker.await?;
    Ok(())
}
