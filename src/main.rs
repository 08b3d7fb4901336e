// Binary Markets - Main Entry Point
// Local simulation plus an optional remote ledger session behind one HTTP API

use binary_markets::app_state::{run_metadata_sink, AppState, SharedState};
use binary_markets::config::EngineConfig;
use binary_markets::handlers::router;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("\n═══════════════════════════════════════════════");
    println!("     🎲 Binary Markets - AMM Prediction Core");
    println!("═══════════════════════════════════════════════\n");

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let bind_addr = config.bind_addr;

    let (app_state, metadata_rx) = match AppState::from_config(config) {
        Ok(built) => built,
        Err(e) => {
            error!("❌ failed to start: {}", e);
            std::process::exit(1);
        }
    };
    let state: SharedState = Arc::new(app_state);

    // Background refresh, metadata purge and metadata persistence
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(state.poller().run(shutdown_rx));
    if let Some(rx) = metadata_rx {
        tokio::spawn(run_metadata_sink(state.sim.clone(), rx));
    }

    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("❌ cannot bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    println!("\n╔════════════════════════════════════════════╗");
    println!("║   🚀 SERVER RUNNING                        ║");
    println!("║   📡 http://{:<31}║", bind_addr);
    println!("╚════════════════════════════════════════════╝\n");

    println!("📋 Available Endpoints:");
    println!("   GET  /markets                     - List simulated markets");
    println!("   POST /markets                     - Create simulated market");
    println!("   GET  /markets/:id                 - Market details and probabilities");
    println!("   GET  /markets/:id/quote           - Preview shares for a deposit");
    println!("   POST /markets/:id/buy             - Buy outcome shares");
    println!("   POST /markets/:id/resolve         - Resolve (creator or admin)");
    println!("   POST /markets/:id/cancel          - Cancel and enable refunds");
    println!("   POST /markets/:id/claim           - Claim payout or refund");
    println!("   GET  /positions/:user             - Positions held by a user");
    println!("   GET  /ledger                      - Remote session snapshot");
    println!("   GET  /ledger/actions              - Pending and finished actions");
    println!("   POST /ledger/authorize            - Grant spend authorization");
    println!("   POST /ledger/markets[/:id/...]    - Remote create/buy/resolve/cancel/claim\n");

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️ failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        println!("\n\n🛑 Shutdown signal received...");
        let _ = shutdown_tx.send(true);
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!("❌ server error: {}", e);
    }

    if let Err(e) = poller.await {
        warn!("⚠️ poller ended abnormally: {}", e);
    }
    info!("👋 Goodbye!");
}
