// =============================================================================
// Funding Sentinel — Main Entry Point
// =============================================================================
//
// Periodic condition monitor for perpetual-futures funding rates: users
// register threshold rules per symbol, the monitor polls the exchange on a
// fixed cadence, notifies owners on matches, and retires a rule after two
// consecutive matching cycles.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alert_store;
mod api;
mod app_state;
mod error;
mod evaluator;
mod monitor;
mod notify;
mod repeat_tracker;
mod runtime_config;
mod source;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::notify::{Notifier, TelegramNotifier};
use crate::runtime_config::RuntimeConfig;
use crate::source::{BinanceFundingSource, SignalSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Funding Sentinel — Starting Up                   ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load("sentinel_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    info!(
        alerts_path = %config.alerts_path,
        poll_interval_secs = config.poll_interval_secs,
        max_rules_per_user = config.max_rules_per_user,
        "Monitor configured"
    );

    let fetch_timeout = config.fetch_timeout_secs;

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));

    // ── 3. Build external collaborators ──────────────────────────────────
    let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
    if bot_token.is_empty() {
        warn!("TELEGRAM_BOT_TOKEN is not set — notification delivery will fail");
    }

    let source: Arc<dyn SignalSource> = Arc::new(BinanceFundingSource::with_timeout(fetch_timeout));
    let notifier: Arc<dyn Notifier> =
        Arc::new(TelegramNotifier::with_timeout(bot_token, fetch_timeout));

    // ── 4. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("SENTINEL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8443".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 5. Alert monitor loop ────────────────────────────────────────────
    tokio::spawn(monitor::run_alert_monitor(
        state.clone(),
        source,
        notifier,
    ));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    // Alert book writes are atomic (tmp + rename), so an in-flight tick can
    // be abandoned here without corrupting durable state.
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");

    info!("Funding Sentinel shut down complete.");
    Ok(())
}
