//! LLM capability interface and backend selection.
//!
//! Two backends implement `LlmClient`: a deterministic local mock and the networked
//! Gemini client. The choice is made once, at startup, by `from_settings`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::{GeminiSettings, Settings};
use crate::domain::{GenerateInput, GenerateResponse, RegenerateSection};

pub mod gemini;
pub mod mock;

pub use gemini::GeminiClient;
pub use mock::MockClient;

/// Where a failure originated: the upstream vendor, or our own process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
  Upstream,
  Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
  #[error("LLM request timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },
  #[error("LLM network error: {0}")]
  Network(String),
  #[error("LLM HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("LLM blocked the response (finishReason: {0})")]
  Blocked(String),
  #[error("LLM returned empty candidate text")]
  EmptyCandidate,
  #[error("LLM response body could not be decoded: {0}")]
  InvalidBody(String),
  #[error("internal error: {0}")]
  Internal(String),
}

/// HTTP statuses worth another attempt.
pub const RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

impl LlmError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      LlmError::Internal(_) => ErrorKind::Internal,
      _ => ErrorKind::Upstream,
    }
  }

  pub fn retryable(&self) -> bool {
    match self {
      LlmError::Timeout { .. } | LlmError::Network(_) | LlmError::InvalidBody(_) => true,
      LlmError::Http { status, .. } => RETRYABLE_STATUS.contains(status),
      LlmError::Blocked(_)
      | LlmError::EmptyCandidate
      | LlmError::Internal(_) => false,
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      LlmError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }
}

/// Text generation over any backend. Returns raw model text; parsing is the caller's job.
#[async_trait]
pub trait LlmClient: Send + Sync {
  /// Short backend name for logs and health output.
  fn name(&self) -> &'static str;

  async fn generate(&self, input: &GenerateInput) -> Result<String, LlmError>;

  async fn regenerate(
    &self,
    input: &GenerateInput,
    current: &GenerateResponse,
    section: RegenerateSection,
  ) -> Result<String, LlmError>;
}

/// Pick the backend: an upstream credential selects Gemini, otherwise the mock.
/// A configured credential whose client cannot be built is a startup error, never a
/// silent downgrade to the mock.
pub fn from_settings(settings: &Settings) -> Result<Arc<dyn LlmClient>, LlmError> {
  select_backend(settings, GeminiClient::new)
}

fn select_backend<F>(settings: &Settings, build_gemini: F) -> Result<Arc<dyn LlmClient>, LlmError>
where
  F: FnOnce(GeminiSettings) -> Result<GeminiClient, LlmError>,
{
  if settings.gemini.api_key.is_none() {
    info!(target: "llm", "GEMINI_API_KEY not set; using deterministic mock backend");
    let mock: Arc<dyn LlmClient> = Arc::new(MockClient::new());
    return Ok(mock);
  }

  let client = build_gemini(settings.gemini.clone()).map_err(|e| {
    error!(target: "llm", error = %e, "Failed to build Gemini client");
    e
  })?;
  info!(target: "llm", model = %settings.gemini.model, "Using Gemini backend");
  let gemini: Arc<dyn LlmClient> = Arc::new(client);
  Ok(gemini)
}
