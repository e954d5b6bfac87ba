//! Application state: resolved settings and the generation pipeline.
//!
//! Built once at startup. Nothing in here is mutated afterwards, so handlers share it
//! through an `Arc` without locking.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::Settings;
use crate::llm::{self, LlmClient, LlmError};
use crate::pipeline::Generator;

#[derive(Clone)]
pub struct AppState {
    pub generator: Generator,
}

impl AppState {
    /// Build state from env: resolve settings, pick the backend, wire the pipeline.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Result<Self, LlmError> {
        let settings = Settings::from_env();
        info!(
            target: "passage_forge",
            gemini = ?settings.gemini,
            pipeline = ?settings.pipeline,
            "Settings resolved"
        );
        let client = llm::from_settings(&settings)?;
        Ok(Self::with_client(client, &settings))
    }

    pub fn with_client(client: Arc<dyn LlmClient>, settings: &Settings) -> Self {
        Self { generator: Generator::new(client, settings.pipeline) }
    }
}
