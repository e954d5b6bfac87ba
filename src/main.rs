//! Passage Forge · classroom reading-material generator
//!
//! - Axum HTTP API: `/api/generate`, `/api/regenerate`, `/api/v1/health`
//! - Gemini backend when a key is configured, deterministic mock otherwise
//! - Validation + rule checks + bounded auto-repair on every generation
//!
//! Important env variables:
//!   PORT                                  : u16 (default 3000)
//!   GEMINI_API_KEY                        : enables the Gemini backend if present
//!   GEMINI_MODEL                          : default "gemini-2.5-flash"
//!   GEMINI_API_BASE_URL                   : default "https://generativelanguage.googleapis.com"
//!   GEMINI_TIMEOUT_MS                     : per-attempt timeout (default 20000)
//!   GEMINI_MAX_RETRIES                    : retries after the first attempt (default 2)
//!   GEMINI_RETRY_BASE_DELAY_MS            : backoff base (default 700)
//!   GEMINI_THINKING_BUDGET                : default 0
//!   GEMINI_MAX_OUTPUT_TOKENS              : optional output cap
//!   GEMINI_LOG_USAGE                      : "true"/"false" (default on when APP_ENV=development)
//!   GENERATOR_AUTO_RETRY_PARSE            : default true
//!   GENERATOR_AUTO_REGENERATE_RULE_ERRORS : default true
//!   GENERATOR_CONFIG_PATH                 : optional TOML file with the same settings
//!   LOG_LEVEL                             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT                            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod prompt;
mod schema;
mod rules;
mod llm;
mod pipeline;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let state = Arc::new(AppState::new()?);
  let app = build_router(state);

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "passage_forge", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::warn!(target: "passage_forge", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!(target: "passage_forge", "Shutdown signal received");
}
