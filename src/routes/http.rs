//! HTTP endpoint handlers. These are thin wrappers that forward to the pipeline and map
//! its outcome onto the response envelope and status code.
//!
//! Every error path ends here: request-shape rejections, pipeline outcomes, `LlmError`
//! and panics (via `handle_panic`). Internal details are logged, never returned.

use std::any::Any;
use std::sync::Arc;

use axum::{
  extract::{rejection::JsonRejection, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{error, info, instrument, warn};

use crate::domain::ViolationCode;
use crate::llm::{ErrorKind, LlmError};
use crate::pipeline::GenerateOutcome;
use crate::protocol::*;
use crate::state::AppState;

type ApiResult = (StatusCode, Json<GenerateApiResponse>);

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, backend: state.generator.backend() })
}

#[instrument(level = "info", skip(state, payload))]
pub async fn http_generate(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<GenerateApiRequest>, JsonRejection>,
) -> ApiResult {
  let Json(body) = match payload {
    Ok(body) => body,
    Err(rejection) => {
      warn!(target: "pipeline", reason = %rejection.body_text(), "Rejected generate request body");
      return (
        StatusCode::BAD_REQUEST,
        Json(GenerateApiResponse::single_error(
          ViolationCode::InputInvalid,
          "입력 스키마가 올바르지 않습니다.",
          Some("input"),
          "Invalid input",
        )),
      );
    }
  };

  match state.generator.generate(&body.input).await {
    Ok(outcome) => {
      let (status, out) = outcome_response(outcome, "Failed to parse model output");
      info!(target: "pipeline", status = status.as_u16(), ok = out.ok, "HTTP generate served");
      (status, Json(out))
    }
    Err(e) => llm_error_response(&e, false),
  }
}

#[instrument(level = "info", skip(state, payload))]
pub async fn http_regenerate(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<RegenerateApiRequest>, JsonRejection>,
) -> ApiResult {
  let Json(body) = match payload {
    Ok(body) => body,
    Err(rejection) => {
      warn!(target: "pipeline", reason = %rejection.body_text(), "Rejected regenerate request body");
      return (
        StatusCode::BAD_REQUEST,
        Json(GenerateApiResponse::single_error(
          ViolationCode::RegenerateInputInvalid,
          "재생성 입력 스키마가 올바르지 않습니다.",
          None,
          "Invalid regenerate request",
        )),
      );
    }
  };

  match state.generator.regenerate(&body.input, &body.current, body.section).await {
    Ok(outcome) => {
      let (status, out) = outcome_response(outcome, "Failed to parse regenerated output");
      info!(target: "pipeline", section = body.section.as_str(), status = status.as_u16(), "HTTP regenerate served");
      (status, Json(out))
    }
    Err(e) => llm_error_response(&e, true),
  }
}

fn outcome_response(outcome: GenerateOutcome, parse_failure_message: &str) -> (StatusCode, GenerateApiResponse) {
  match outcome {
    GenerateOutcome::InputRejected { violations } => (
      StatusCode::BAD_REQUEST,
      GenerateApiResponse::failure(violations, false, "Input validation failed"),
    ),
    GenerateOutcome::ParseFailed { violations, auto_regenerated } => (
      StatusCode::UNPROCESSABLE_ENTITY,
      GenerateApiResponse::failure(violations, auto_regenerated, parse_failure_message),
    ),
    GenerateOutcome::Completed { data, violations, auto_regenerated } => {
      (StatusCode::OK, GenerateApiResponse::success(data, violations, auto_regenerated))
    }
  }
}

/// Upstream failures become 502 `LLM_UPSTREAM_ERROR`, everything else 500 `SERVER_ERROR`.
/// With `with_reason`, the upstream reason (never internal text) is echoed to the caller.
fn llm_error_response(e: &LlmError, with_reason: bool) -> ApiResult {
  match e.kind() {
    ErrorKind::Upstream => {
      error!(target: "llm", error = %e, status = ?e.status(), "LLM upstream error");
      let body = if with_reason {
        let reason = e.to_string();
        GenerateApiResponse::single_error(
          ViolationCode::LlmUpstreamError,
          &format!("LLM 호출 실패: {}", reason),
          None,
          &reason,
        )
      } else {
        GenerateApiResponse::single_error(
          ViolationCode::LlmUpstreamError,
          "LLM 호출 중 오류가 발생했습니다.",
          None,
          "LLM upstream error",
        )
      };
      (StatusCode::BAD_GATEWAY, Json(body))
    }
    ErrorKind::Internal => {
      error!(target: "passage_forge", error = %e, "Unhandled server error");
      server_error()
    }
  }
}

fn server_error() -> ApiResult {
  (
    StatusCode::INTERNAL_SERVER_ERROR,
    Json(GenerateApiResponse::single_error(
      ViolationCode::ServerError,
      "서버 오류가 발생했습니다.",
      None,
      "Server error",
    )),
  )
}

/// Panic hook for `CatchPanicLayer`: log and answer with the generic server-error envelope.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
  let detail = err
    .downcast_ref::<String>()
    .cloned()
    .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
    .unwrap_or_else(|| "unknown panic".to_string());
  error!(target: "passage_forge", %detail, "Handler panicked");
  server_error().into_response()
}
