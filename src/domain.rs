//! Domain models shared by the pipeline: generation input, validated model output,
//! and rule violations.
//!
//! All structs reject unknown fields so that request bodies and `current` candidates
//! are held to the same strict shape as model output.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;

/// Which kind of exam question the passage comes with.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  /// Fill-in-the-blank.
  Blank,
  /// "Which word is inappropriate in context?"
  VocabInappropriate,
  Grammar,
  /// Passage commentary without a graded question.
  PassageExplain,
}

impl QuestionType {
  pub fn as_str(&self) -> &'static str {
    match self {
      QuestionType::Blank => "blank",
      QuestionType::VocabInappropriate => "vocab_inappropriate",
      QuestionType::Grammar => "grammar",
      QuestionType::PassageExplain => "passage_explain",
    }
  }
}

/// How finely reading blocks are chunked.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Density {
  Low,
  Base,
  High,
}

impl Density {
  pub fn as_str(&self) -> &'static str {
    match self {
      Density::Low => "low",
      Density::Base => "base",
      Density::High => "high",
    }
  }

  /// Words per chunk when chunking locally.
  pub fn chunk_size(&self) -> usize {
    match self {
      Density::Low => 7,
      Density::Base => 5,
      Density::High => 3,
    }
  }
}

/// A field that exists on the wire for compatibility but can only ever be `true`.
///
/// Deserializing `false` fails; serializing always yields `true`. Nothing reads it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pinned;

impl Serialize for Pinned {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(true)
  }
}

impl<'de> Deserialize<'de> for Pinned {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    if bool::deserialize(deserializer)? {
      Ok(Pinned)
    } else {
      Err(serde::de::Error::custom("pinned option must be true"))
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerateOptions {
  pub density: Density,
  pub include_choice_analysis: bool,
  #[serde(default)] pub fixed_vocab_five: Pinned,
  #[serde(default)] pub fixed_synonyms_three: Pinned,
  #[serde(default)] pub enforce_single_word: Pinned,
}

/// User-declared request, immutable for the duration of one pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerateInput {
  pub passage: String,
  pub question_type: QuestionType,
  pub choices: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub answer: Option<String>,
  pub options: GenerateOptions,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReadingBlock {
  pub sentence_no: Number,
  pub chunks: Vec<String>,
  pub ko: String,
  pub logic_points: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SolutionLogic {
  #[serde(rename = "final")]
  pub final_answer: String,
  pub rationale: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
  O,
  X,
  #[serde(rename = "N/A")]
  NotApplicable,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChoiceAnalysis {
  pub no: Number,
  pub text: String,
  pub verdict: Verdict,
  pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Synonym {
  pub w: String,
  pub ko: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VocabItem {
  pub word: String,
  pub ko_meaning: String,
  pub synonyms: Vec<Synonym>,
}

/// Validated model output. Snake-case top-level keys, camelCase inside, as the model emits them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GenerateResponse {
  pub reading_blocks: Vec<ReadingBlock>,
  pub solution_logic: SolutionLogic,
  pub choice_analysis: Vec<ChoiceAnalysis>,
  pub vocab: Vec<VocabItem>,
  pub one_liner: String,
}

/// One of the independently regenerable slices of a response.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegenerateSection {
  All,
  Vocab,
  Choices,
  Reading,
}

impl RegenerateSection {
  pub fn as_str(&self) -> &'static str {
    match self {
      RegenerateSection::All => "all",
      RegenerateSection::Vocab => "vocab",
      RegenerateSection::Choices => "choices",
      RegenerateSection::Reading => "reading",
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Error,
  Warning,
}

/// Stable violation identifiers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
  PassageRequired,
  ChoicesCountInvalid,
  VocabCountMismatch,
  VocabWordNotSingle,
  SynonymCountMismatch,
  SynonymNotSingle,
  JsonParseFailed,
  InputInvalid,
  RegenerateInputInvalid,
  LlmUpstreamError,
  ServerError,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuleViolation {
  pub code: ViolationCode,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  pub severity: Severity,
}

impl RuleViolation {
  pub fn error(code: ViolationCode, message: impl Into<String>, path: Option<String>) -> Self {
    Self { code, message: message.into(), path, severity: Severity::Error }
  }

  pub fn warning(code: ViolationCode, message: impl Into<String>, path: Option<String>) -> Self {
    Self { code, message: message.into(), path, severity: Severity::Warning }
  }

  pub fn is_error(&self) -> bool {
    self.severity == Severity::Error
  }
}
