//! Generation orchestrator: input checks, model call, parse, rule check, and the
//! bounded repair ladder.
//!
//! Ladder for a full generation run:
//!   1. validate input (error-severity findings stop the run before any model call)
//!   2. `generate` + parse; on parse failure, at most one more `generate` + parse
//!   3. rule check; on error findings, at most one `regenerate(all)` + parse
//!
//! Violations are recomputed from scratch for every accepted candidate. Upstream and
//! internal failures propagate as `LlmError`; everything else is returned as data.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineFlags;
use crate::domain::{
  GenerateInput, GenerateResponse, RegenerateSection, RuleViolation, ViolationCode,
};
use crate::llm::{LlmClient, LlmError};
use crate::rules::{check, has_error, validate_input};
use crate::schema::parse_generate_response;
use crate::util::trunc_for_log;

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
  /// Input validation failed; no model call was made.
  InputRejected { violations: Vec<RuleViolation> },
  /// No parseable candidate was produced.
  ParseFailed { violations: Vec<RuleViolation>, auto_regenerated: bool },
  /// A parsed candidate exists. `violations` may still contain errors.
  Completed { data: GenerateResponse, violations: Vec<RuleViolation>, auto_regenerated: bool },
}

pub fn parse_error_violation(message: impl Into<String>) -> RuleViolation {
  RuleViolation::error(ViolationCode::JsonParseFailed, message, Some("response".into()))
}

#[derive(Clone)]
pub struct Generator {
  client: Arc<dyn LlmClient>,
  flags: PipelineFlags,
}

impl Generator {
  pub fn new(client: Arc<dyn LlmClient>, flags: PipelineFlags) -> Self {
    Self { client, flags }
  }

  pub fn backend(&self) -> &'static str {
    self.client.name()
  }

  /// Full generation with the auto-repair ladder.
  #[instrument(
    level = "info",
    skip(self, input),
    fields(run_id = %Uuid::new_v4(), backend = self.client.name(), question_type = input.question_type.as_str())
  )]
  pub async fn generate(&self, input: &GenerateInput) -> Result<GenerateOutcome, LlmError> {
    let input_violations = validate_input(input);
    if has_error(&input_violations) {
      info!(target: "pipeline", count = input_violations.len(), "Input rejected");
      return Ok(GenerateOutcome::InputRejected { violations: input_violations });
    }

    let mut auto_regenerated = false;
    let raw = self.client.generate(input).await?;
    let mut parsed = parse_generate_response(&raw);

    let retry = match &parsed {
      Err(e) if self.flags.auto_retry_parse => {
        warn!(
          target: "pipeline",
          error = %e,
          preview = %trunc_for_log(&raw, 200),
          "First candidate failed to parse; retrying once"
        );
        true
      }
      _ => false,
    };
    if retry {
      auto_regenerated = true;
      parsed = parse_generate_response(&self.client.generate(input).await?);
    }

    let mut data = match parsed {
      Ok(data) => data,
      Err(e) => {
        warn!(target: "pipeline", error = %e, %auto_regenerated, "No parseable candidate");
        let mut violations = input_violations;
        violations.push(parse_error_violation(e.0));
        return Ok(GenerateOutcome::ParseFailed { violations, auto_regenerated });
      }
    };

    let mut violations = with_rules(&input_violations, &data);

    if has_error(&violations) && !auto_regenerated && self.flags.auto_regenerate_rule_errors {
      info!(target: "pipeline", count = violations.len(), "Rule errors found; regenerating once");
      let raw = self.client.regenerate(input, &data, RegenerateSection::All).await?;
      auto_regenerated = true;
      match parse_generate_response(&raw) {
        Ok(next) => {
          data = next;
          violations = with_rules(&input_violations, &data);
        }
        Err(e) => {
          warn!(target: "pipeline", error = %e, "Regenerated candidate failed to parse; keeping previous");
          violations.push(parse_error_violation(e.0));
        }
      }
    }

    info!(
      target: "pipeline",
      blocks = data.reading_blocks.len(),
      violations = violations.len(),
      errors = has_error(&violations),
      %auto_regenerated,
      "Generation finished"
    );
    Ok(GenerateOutcome::Completed { data, violations, auto_regenerated })
  }

  /// Explicit regeneration of one section: one call, one parse, rule check. No ladder.
  #[instrument(
    level = "info",
    skip(self, input, current),
    fields(run_id = %Uuid::new_v4(), backend = self.client.name(), section = section.as_str())
  )]
  pub async fn regenerate(
    &self,
    input: &GenerateInput,
    current: &GenerateResponse,
    section: RegenerateSection,
  ) -> Result<GenerateOutcome, LlmError> {
    let raw = self.client.regenerate(input, current, section).await?;
    match parse_generate_response(&raw) {
      Ok(data) => {
        let violations = check(&data);
        info!(target: "pipeline", violations = violations.len(), "Regeneration finished");
        Ok(GenerateOutcome::Completed { data, violations, auto_regenerated: false })
      }
      Err(e) => {
        warn!(target: "pipeline", error = %e, "Regenerated candidate failed to parse");
        Ok(GenerateOutcome::ParseFailed {
          violations: vec![parse_error_violation(e.0)],
          auto_regenerated: false,
        })
      }
    }
  }
}

fn with_rules(input_violations: &[RuleViolation], data: &GenerateResponse) -> Vec<RuleViolation> {
  let mut all = input_violations.to_vec();
  all.extend(check(data));
  all
}
