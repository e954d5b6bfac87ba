//! Networked backend: Google Gemini `generateContent`.
//!
//! Every call is pinned to temperature 0 and carries a response schema mirroring
//! `GenerateResponse`. Each attempt runs under its own deadline; retryable failures
//! (timeouts, network errors, 408/429/5xx) are retried with exponential backoff.
//!
//! NOTE: the API key travels in a header, never in the URL, and is never logged.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::config::GeminiSettings;
use crate::domain::{GenerateInput, GenerateResponse, RegenerateSection};
use crate::llm::{LlmClient, LlmError};
use crate::prompt::{build_prompt, build_regenerate_prompt};
use crate::schema::recover_json_object;

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_JITTER_MS: u64 = 250;
const BLOCKED_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "RECITATION"];

#[derive(Clone)]
pub struct GeminiClient {
  client: reqwest::Client,
  settings: GeminiSettings,
}

impl GeminiClient {
  pub fn new(settings: GeminiSettings) -> Result<Self, LlmError> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| LlmError::Internal(format!("failed to build HTTP client: {e}")))?;
    Ok(Self { client, settings })
  }

  fn endpoint(&self) -> String {
    format!(
      "{}/v1beta/models/{}:generateContent",
      self.settings.base_url.trim_end_matches('/'),
      self.settings.model
    )
  }

  fn request_body<'a>(&self, prompt: &'a str) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
      contents: vec![Content { role: "user", parts: vec![PartReq { text: prompt }] }],
      generation_config: GenerationConfig {
        temperature: 0.0,
        response_mime_type: "application/json",
        response_schema: response_schema(),
        thinking_config: ThinkingConfig { thinking_budget: self.settings.thinking_budget },
        max_output_tokens: self.settings.max_output_tokens,
      },
    }
  }

  /// One HTTP round trip under the configured deadline.
  async fn request_once(&self, prompt: &str) -> Result<String, LlmError> {
    let api_key = self.settings.api_key.as_deref().unwrap_or_default();
    let timeout_ms = self.settings.timeout_ms;
    let body = self.request_body(prompt);

    // Dropping the future on timeout aborts the in-flight transport.
    let call = async {
      let res = self
        .client
        .post(self.endpoint())
        .header(USER_AGENT, "passage-forge/0.1")
        .header(CONTENT_TYPE, "application/json")
        .header(API_KEY_HEADER, api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| LlmError::Network(e.without_url().to_string()))?;
      let status = res.status();
      let text = res.text().await.map_err(|e| LlmError::Network(e.without_url().to_string()))?;
      Ok::<_, LlmError>((status, text))
    };

    let (status, text) = match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
      Ok(result) => result?,
      Err(_) => return Err(LlmError::Timeout { timeout_ms }),
    };

    let payload = serde_json::from_str::<GeminiApiResponse>(&text).ok();
    if let Some(p) = &payload {
      if self.settings.log_usage {
        log_usage(p, &self.settings.model);
      }
    }

    if !status.is_success() {
      let message = payload
        .as_ref()
        .and_then(|p| p.error.as_ref())
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| format!("Gemini request failed ({})", status.as_u16()));
      return Err(LlmError::Http { status: status.as_u16(), message });
    }

    match payload {
      Some(p) => extract_candidate_text(&p),
      None => Err(LlmError::InvalidBody("response is not a generateContent payload".into())),
    }
  }

  #[instrument(level = "info", skip(self, prompt), fields(model = %self.settings.model, prompt_len = prompt.len()))]
  async fn request(&self, prompt: &str) -> Result<String, LlmError> {
    let start = Instant::now();
    let result = with_retries(self.settings.max_retries, self.settings.retry_base_delay_ms, |_| {
      self.request_once(prompt)
    })
    .await;
    let elapsed = start.elapsed();

    match &result {
      Ok(text) => info!(target: "llm", ?elapsed, response_len = text.len(), "Gemini response received"),
      Err(e) => error!(target: "llm", ?elapsed, error = %e, status = ?e.status(), "Gemini call failed"),
    }
    result
  }
}

#[async_trait]
impl LlmClient for GeminiClient {
  fn name(&self) -> &'static str {
    "gemini"
  }

  async fn generate(&self, input: &GenerateInput) -> Result<String, LlmError> {
    self.request(&build_prompt(input)).await
  }

  async fn regenerate(
    &self,
    input: &GenerateInput,
    current: &GenerateResponse,
    section: RegenerateSection,
  ) -> Result<String, LlmError> {
    self.request(&build_regenerate_prompt(input, current, section)).await
  }
}

/// `base * 2^attempt + jitter`, jitter drawn from `0..250ms`.
pub(crate) fn backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
  let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
  let factor = 2u64.saturating_pow(attempt);
  Duration::from_millis(base_delay_ms.saturating_mul(factor).saturating_add(jitter))
}

/// Run `op` up to `max_retries + 1` times, sleeping between attempts. Only retryable
/// errors trigger another attempt; the last error is returned when attempts run out.
pub(crate) async fn with_retries<F, Fut>(max_retries: u32, base_delay_ms: u64, mut op: F) -> Result<String, LlmError>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<String, LlmError>>,
{
  let mut attempt = 0;
  loop {
    match op(attempt).await {
      Ok(text) => return Ok(text),
      Err(e) if e.retryable() && attempt < max_retries => {
        let delay = backoff_delay(attempt, base_delay_ms);
        warn!(target: "llm", attempt, ?delay, error = %e, "Retryable LLM failure; backing off");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

/// Pull the candidate text out of a successful payload and unwrap code fences.
fn extract_candidate_text(payload: &GeminiApiResponse) -> Result<String, LlmError> {
  let candidate = payload.candidates.first();

  if let Some(reason) = candidate.and_then(|c| c.finish_reason.as_deref()) {
    if BLOCKED_FINISH_REASONS.iter().any(|r| *r == reason) {
      return Err(LlmError::Blocked(reason.to_string()));
    }
  }

  let text: String = candidate
    .and_then(|c| c.content.as_ref())
    .map(|content| content.parts.iter().filter_map(|p| p.text.as_deref()).collect())
    .unwrap_or_default();
  let text = text.trim();

  if text.is_empty() {
    return Err(LlmError::EmptyCandidate);
  }
  Ok(recover_json_object(text).to_string())
}

fn log_usage(payload: &GeminiApiResponse, model: &str) {
  let finish_reason = payload
    .candidates
    .first()
    .and_then(|c| c.finish_reason.as_deref())
    .unwrap_or("UNKNOWN");

  match &payload.usage_metadata {
    Some(u) => info!(
      target: "llm",
      %model,
      %finish_reason,
      prompt = u.prompt_token_count.unwrap_or(0),
      candidate = u.candidates_token_count.unwrap_or(0),
      total = u.total_token_count.unwrap_or(0),
      thoughts = u.thoughts_token_count.unwrap_or(0),
      cached = u.cached_content_token_count.unwrap_or(0),
      "Gemini usage"
    ),
    None => info!(target: "llm", %model, %finish_reason, "Gemini usage unavailable"),
  }
}

/// Structured output hint matching `GenerateResponse`.
fn response_schema() -> Value {
  let string = json!({ "type": "STRING" });
  let string_list = json!({ "type": "ARRAY", "items": string });
  json!({
    "type": "OBJECT",
    "required": ["reading_blocks", "solution_logic", "choice_analysis", "vocab", "one_liner"],
    "properties": {
      "reading_blocks": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "required": ["sentenceNo", "chunks", "ko", "logicPoints"],
          "properties": {
            "sentenceNo": { "type": "NUMBER" },
            "chunks": string_list,
            "ko": string,
            "logicPoints": string_list
          }
        }
      },
      "solution_logic": {
        "type": "OBJECT",
        "required": ["final", "rationale"],
        "properties": { "final": string, "rationale": string }
      },
      "choice_analysis": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "required": ["no", "text", "verdict", "reason"],
          "properties": {
            "no": { "type": "NUMBER" },
            "text": string,
            "verdict": { "type": "STRING", "enum": ["O", "X", "N/A"] },
            "reason": string
          }
        }
      },
      "vocab": {
        "type": "ARRAY",
        "items": {
          "type": "OBJECT",
          "required": ["word", "koMeaning", "synonyms"],
          "properties": {
            "word": string,
            "koMeaning": string,
            "synonyms": {
              "type": "ARRAY",
              "items": {
                "type": "OBJECT",
                "required": ["w", "ko"],
                "properties": { "w": string, "ko": string }
              }
            }
          }
        }
      },
      "one_liner": string
    }
  })
}

// --- generateContent DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
  contents: Vec<Content<'a>>,
  generation_config: GenerationConfig,
}
#[derive(Serialize)]
struct Content<'a> { role: &'static str, parts: Vec<PartReq<'a>> }
#[derive(Serialize)]
struct PartReq<'a> { text: &'a str }
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  temperature: f32,
  response_mime_type: &'static str,
  response_schema: Value,
  thinking_config: ThinkingConfig,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_output_tokens: Option<u32>,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig { thinking_budget: u32 }

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiApiResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] usage_metadata: Option<UsageMetadata>,
  #[serde(default)] error: Option<ApiErrorBody>,
}
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
  #[serde(default)] content: Option<CandidateContent>,
  #[serde(default)] finish_reason: Option<String>,
}
#[derive(Deserialize)]
struct CandidateContent { #[serde(default)] parts: Vec<PartResp> }
#[derive(Deserialize)]
struct PartResp { #[serde(default)] text: Option<String> }
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
  #[serde(default)] thoughts_token_count: Option<u32>,
  #[serde(default)] cached_content_token_count: Option<u32>,
}
#[derive(Deserialize)]
struct ApiErrorBody { #[serde(default)] message: Option<String> }

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};

  use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

  use crate::domain::{Density, GenerateOptions, Pinned, QuestionType};

  fn payload(v: Value) -> GeminiApiResponse {
    serde_json::from_value(v).unwrap()
  }

  fn settings(base_url: String) -> GeminiSettings {
    GeminiSettings {
      api_key: Some("test-key".into()),
      model: "test-model".into(),
      base_url,
      timeout_ms: 2_000,
      max_retries: 2,
      retry_base_delay_ms: 1,
      thinking_budget: 0,
      max_output_tokens: Some(512),
      log_usage: true,
    }
  }

  fn input() -> GenerateInput {
    GenerateInput {
      passage: "Cats are mammals.".into(),
      question_type: QuestionType::Blank,
      choices: vec![],
      answer: None,
      options: GenerateOptions {
        density: Density::Base,
        include_choice_analysis: false,
        fixed_vocab_five: Pinned,
        fixed_synonyms_three: Pinned,
        enforce_single_word: Pinned,
      },
    }
  }

  #[test]
  fn candidate_text_is_joined_and_unfenced() {
    let p = payload(json!({
      "candidates": [{"content": {"parts": [{"text": "```json\n{\"a\":"}, {"text": " 1}\n```"}]}, "finishReason": "STOP"}]
    }));
    assert_eq!(extract_candidate_text(&p).unwrap(), "{\"a\": 1}");
  }

  #[test]
  fn blocked_and_empty_candidates_are_not_retryable() {
    let blocked = payload(json!({"candidates": [{"finishReason": "SAFETY"}]}));
    let err = extract_candidate_text(&blocked).unwrap_err();
    assert!(matches!(err, LlmError::Blocked(ref r) if r == "SAFETY"));
    assert!(!err.retryable());

    let empty = payload(json!({"candidates": [{"content": {"parts": [{"text": "   "}]}}]}));
    assert!(matches!(extract_candidate_text(&empty), Err(LlmError::EmptyCandidate)));
    assert!(matches!(extract_candidate_text(&payload(json!({}))), Err(LlmError::EmptyCandidate)));
  }

  #[test]
  fn backoff_grows_exponentially_with_bounded_jitter() {
    for attempt in 0..4u32 {
      let d = backoff_delay(attempt, 700).as_millis() as u64;
      let base = 700 * 2u64.pow(attempt);
      assert!(d >= base && d < base + MAX_JITTER_MS, "attempt {attempt}: {d}");
    }
  }

  #[tokio::test]
  async fn retries_stop_after_budget() {
    let calls = AtomicUsize::new(0);
    let result = with_retries(2, 1, |_| {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(LlmError::Http { status: 503, message: "busy".into() }) }
    })
    .await;
    assert!(matches!(result, Err(LlmError::Http { status: 503, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn non_retryable_error_fails_immediately() {
    let calls = AtomicUsize::new(0);
    let result = with_retries(2, 1, |_| {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(LlmError::Http { status: 400, message: "bad".into() }) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn transient_failure_then_success() {
    let result = with_retries(2, 1, |attempt| async move {
      if attempt == 0 {
        Err(LlmError::Timeout { timeout_ms: 1 })
      } else {
        Ok(format!("ok after {attempt}"))
      }
    })
    .await;
    assert_eq!(result.unwrap(), "ok after 1");
  }

  #[derive(Clone, Default)]
  struct Stub {
    hits: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
    last_key: Arc<Mutex<Option<String>>>,
  }

  async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
  }

  #[tokio::test]
  async fn sends_pinned_generation_config_and_returns_unfenced_text() {
    async fn handler(
      State(stub): State<Stub>,
      headers: axum::http::HeaderMap,
      Json(body): Json<Value>,
    ) -> Json<Value> {
      stub.hits.fetch_add(1, Ordering::SeqCst);
      *stub.last_key.lock().unwrap() =
        headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()).map(String::from);
      *stub.last_body.lock().unwrap() = Some(body);
      Json(json!({
        "candidates": [{"content": {"parts": [{"text": "```json\n{\"ok\": true}\n```"}]}, "finishReason": "STOP"}],
        "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
      }))
    }

    let stub = Stub::default();
    let app = Router::new()
      .route("/v1beta/models/*rest", post(handler))
      .with_state(stub.clone());
    let base = serve(app).await;

    let client = GeminiClient::new(settings(base)).unwrap();
    let text = client.generate(&input()).await.unwrap();
    assert_eq!(text, "{\"ok\": true}");
    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    assert_eq!(stub.last_key.lock().unwrap().as_deref(), Some("test-key"));

    let body = stub.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["generationConfig"]["temperature"], json!(0.0));
    assert_eq!(body["generationConfig"]["responseMimeType"], json!("application/json"));
    assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], json!(0));
    assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(512));
    assert_eq!(body["generationConfig"]["responseSchema"]["required"][3], json!("vocab"));
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.contains("Passage:\nCats are mammals."));
  }

  #[tokio::test]
  async fn retryable_status_is_retried_then_surfaced() {
    async fn handler(State(stub): State<Stub>) -> (StatusCode, Json<Value>) {
      stub.hits.fetch_add(1, Ordering::SeqCst);
      (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": {"message": "model overloaded"}})))
    }

    let stub = Stub::default();
    let app = Router::new()
      .route("/v1beta/models/*rest", post(handler))
      .with_state(stub.clone());
    let client = GeminiClient::new(settings(serve(app).await)).unwrap();

    let err = client.generate(&input()).await.unwrap_err();
    assert!(matches!(err, LlmError::Http { status: 503, ref message } if message == "model overloaded"));
    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn client_error_status_is_not_retried() {
    async fn handler(State(stub): State<Stub>) -> (StatusCode, String) {
      stub.hits.fetch_add(1, Ordering::SeqCst);
      (StatusCode::BAD_REQUEST, "not json".to_string())
    }

    let stub = Stub::default();
    let app = Router::new()
      .route("/v1beta/models/*rest", post(handler))
      .with_state(stub.clone());
    let client = GeminiClient::new(settings(serve(app).await)).unwrap();

    let err = client.generate(&input()).await.unwrap_err();
    assert!(matches!(err, LlmError::Http { status: 400, ref message } if message == "Gemini request failed (400)"));
    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn undecodable_success_body_is_retried() {
    async fn handler(State(stub): State<Stub>) -> (StatusCode, String) {
      stub.hits.fetch_add(1, Ordering::SeqCst);
      (StatusCode::OK, "<html>gateway hiccup</html>".to_string())
    }

    let stub = Stub::default();
    let app = Router::new()
      .route("/v1beta/models/*rest", post(handler))
      .with_state(stub.clone());
    let client = GeminiClient::new(settings(serve(app).await)).unwrap();

    let err = client.generate(&input()).await.unwrap_err();
    assert!(matches!(err, LlmError::InvalidBody(_)));
    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn stalled_upstream_times_out_as_retryable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      // Accept and hold connections without ever answering.
      let mut held = Vec::new();
      while let Ok((socket, _)) = listener.accept().await {
        held.push(socket);
      }
    });

    let mut s = settings(format!("http://{addr}"));
    s.timeout_ms = 50;
    s.max_retries = 1;
    let client = GeminiClient::new(s).unwrap();

    let err = client.generate(&input()).await.unwrap_err();
    assert!(matches!(err, LlmError::Timeout { timeout_ms: 50 }));
    assert!(err.retryable());
  }
}
