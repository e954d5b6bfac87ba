//! Deterministic instruction text for the upstream model.
//!
//! Both builders are pure: same input, same text. Line order is part of the contract
//! because backends are sensitive to it.

use crate::domain::{GenerateInput, GenerateResponse, RegenerateSection};

const NO_CHOICES_MARKER: &str = "(선지 없음)";

fn format_choices(choices: &[String]) -> String {
  if choices.is_empty() {
    return NO_CHOICES_MARKER.to_string();
  }
  choices
    .iter()
    .enumerate()
    .map(|(i, c)| format!("{}. {}", i + 1, c))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Build the generation prompt for one request.
pub fn build_prompt(input: &GenerateInput) -> String {
  [
    "Return JSON only.".to_string(),
    "No markdown. No prose outside JSON.".to_string(),
    "Use only fields from the response schema.".to_string(),
    "Generate a classroom explanation set from the input passage/question.".to_string(),
    String::new(),
    "[INPUT]".to_string(),
    format!("Passage:\n{}", input.passage),
    format!("QuestionType: {}", input.question_type.as_str()),
    format!("Choices:\n{}", format_choices(&input.choices)),
    format!("Answer(optional): {}", input.answer.as_deref().unwrap_or("")),
    format!("Density: {}", input.options.density.as_str()),
    format!("IncludeChoiceAnalysis: {}", input.options.include_choice_analysis),
    "Rules: vocab must be exactly 5 items.".to_string(),
    "Rules: each vocab.synonyms must be exactly 3 items.".to_string(),
    "Rules: vocab.word and synonyms.w must be single-word (no spaces).".to_string(),
  ]
  .join("\n")
}

/// Build the prompt asking the model to redo one section of an existing candidate.
///
/// The candidate is embedded verbatim (compact JSON) so the model can keep the
/// untouched sections as they are.
pub fn build_regenerate_prompt(
  input: &GenerateInput,
  current: &GenerateResponse,
  section: RegenerateSection,
) -> String {
  // Serializing plain data structs with string keys cannot fail.
  let current_json = serde_json::to_string(current).unwrap_or_default();
  [
    "Return JSON only.".to_string(),
    "Regenerate the requested section and keep other fields valid.".to_string(),
    "Keep every section other than the requested one unchanged.".to_string(),
    format!("Requested section: {}", section.as_str()),
    String::new(),
    "[ORIGINAL INPUT]".to_string(),
    build_prompt(input),
    String::new(),
    "[CURRENT JSON]".to_string(),
    current_json,
    String::new(),
    "Return full GenerateResponse JSON only.".to_string(),
    "Constraints: vocab exactly 5 items, each vocab must have exactly 3 single-word synonyms.".to_string(),
  ]
  .join("\n")
}
