//! Code Tutor · Chat Backend
//!
//! - Axum HTTP API for tutor chat turns
//! - Adaptive model routing: sessions showing frustration or repeated questions
//!   are escalated to the strongest (most supportive) model tier
//! - Azure OpenAI / OpenAI-compatible LLM gateway
//!
//! Important env variables:
//!   PORT                     : u16 (default 3000)
//!   TUTOR_CONFIG_PATH        : path to TOML config (escalation policy, per-tier models, prompts)
//!   AZURE_OPENAI_ENDPOINT    : fallback endpoint for tiers without one
//!   AZURE_OPENAI_API_KEY     : fallback API key for tiers without one
//!   AZURE_OPENAI_API_VERSION : fallback api-version (default "2024-02-15-preview")
//!   LOG_LEVEL                : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT               : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod escalation;
mod models;
mod state;
mod protocol;
mod logic;
mod openai;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::escalation::spawn_eviction_sweeper;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared application state (escalation tracker, model catalog, LLM gateway, prompts).
  let state = Arc::new(AppState::from_env()?);

  // Idle sessions are swept in the background for the lifetime of the server.
  let sweeper = spawn_eviction_sweeper(state.tracker.clone(), state.sweep_interval);

  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "codetutor_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  sweeper.abort();
  info!(target: "codetutor_backend", tracked_sessions = state.tracker.len(), "Discarding escalation state");
  state.tracker.shutdown();
  info!(target: "codetutor_backend", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "codetutor_backend", error = %e, "Failed to listen for Ctrl-C");
    // Without a signal handler, keep serving until the process is killed.
    std::future::pending::<()>().await;
  }
  info!(target: "codetutor_backend", "Shutdown signal received");
}
