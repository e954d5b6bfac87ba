//! Pedagogical rule checks.
//!
//! `check` runs over a schema-valid response; `validate_input` runs over the request
//! before any model call. Both are total: every rule is evaluated and findings are
//! returned as data.

use crate::domain::{GenerateInput, GenerateResponse, RuleViolation, ViolationCode};
use crate::util::has_inner_whitespace;

/// Vocabulary items per response.
pub const VOCAB_COUNT: usize = 5;
/// Synonyms per vocabulary item.
pub const SYNONYMS_PER_WORD: usize = 3;
/// Choices expected when a question carries choices at all.
pub const CHOICE_COUNT: usize = 5;

pub fn check(data: &GenerateResponse) -> Vec<RuleViolation> {
  let mut violations = Vec::new();

  if data.vocab.len() != VOCAB_COUNT {
    violations.push(RuleViolation::error(
      ViolationCode::VocabCountMismatch,
      "어휘 개수는 정확히 5개여야 합니다.",
      Some("vocab".into()),
    ));
  }

  for (i, item) in data.vocab.iter().enumerate() {
    if has_inner_whitespace(&item.word) {
      violations.push(RuleViolation::error(
        ViolationCode::VocabWordNotSingle,
        "핵심 어휘(word)는 single-word여야 합니다.",
        Some(format!("vocab[{}].word", i)),
      ));
    }

    if item.synonyms.len() != SYNONYMS_PER_WORD {
      violations.push(RuleViolation::error(
        ViolationCode::SynonymCountMismatch,
        "각 어휘의 유의어는 정확히 3개여야 합니다.",
        Some(format!("vocab[{}].synonyms", i)),
      ));
    }

    for (j, synonym) in item.synonyms.iter().enumerate() {
      if has_inner_whitespace(&synonym.w) {
        violations.push(RuleViolation::error(
          ViolationCode::SynonymNotSingle,
          "유의어(w)는 single-word여야 합니다.",
          Some(format!("vocab[{}].synonyms[{}].w", i, j)),
        ));
      }
    }
  }

  violations
}

pub fn validate_input(input: &GenerateInput) -> Vec<RuleViolation> {
  let mut violations = Vec::new();

  if input.passage.trim().is_empty() {
    violations.push(RuleViolation::error(
      ViolationCode::PassageRequired,
      "Passage는 필수입니다.",
      Some("input.passage".into()),
    ));
  }

  if !input.choices.is_empty() && input.choices.len() != CHOICE_COUNT {
    violations.push(RuleViolation::warning(
      ViolationCode::ChoicesCountInvalid,
      "Choices는 5개 기준으로 입력하세요.",
      Some("input.choices".into()),
    ));
  }

  violations
}

pub fn has_error(violations: &[RuleViolation]) -> bool {
  violations.iter().any(RuleViolation::is_error)
}
