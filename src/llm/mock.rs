//! Deterministic offline backend.
//!
//! Synthesizes a schema-valid response straight from the input so the whole pipeline
//! can run without network access or cost. Output only depends on the input.

use async_trait::async_trait;
use serde_json::Number;
use tracing::{debug, instrument};

use crate::domain::{
  ChoiceAnalysis, Density, GenerateInput, GenerateResponse, QuestionType, ReadingBlock,
  RegenerateSection, SolutionLogic, Synonym, Verdict, VocabItem,
};
use crate::llm::{LlmClient, LlmError};

const MAX_SENTENCES: usize = 8;
const FALLBACK_CHOICES: [&str; 5] = ["A", "B", "C", "D", "E"];

/// (word, Korean meaning, synonyms)
const VOCAB_SEED: [(&str, &str, [&str; 3]); 5] = [
  ("inference", "추론", ["deduction", "reasoning", "logic"]),
  ("contrast", "대조", ["difference", "distinction", "opposition"]),
  ("cohesion", "결속", ["unity", "bonding", "coherence"]),
  ("relevance", "관련성", ["relation", "connection", "pertinence"]),
  ("validity", "타당성", ["soundness", "accuracy", "legitimacy"]),
];

#[derive(Clone, Debug, Default)]
pub struct MockClient;

impl MockClient {
  pub fn new() -> Self {
    MockClient
  }
}

/// Split on whitespace that follows `.`, `!` or `?`, after collapsing whitespace runs.
fn split_sentences(passage: &str) -> Vec<String> {
  let mut sentences = Vec::new();
  let mut current: Vec<&str> = Vec::new();
  for word in passage.split_whitespace() {
    current.push(word);
    if word.ends_with(|c: char| matches!(c, '.' | '!' | '?')) {
      sentences.push(current.join(" "));
      current.clear();
    }
  }
  if !current.is_empty() {
    sentences.push(current.join(" "));
  }
  sentences
}

fn sentence_to_chunks(sentence: &str, density: Density) -> Vec<String> {
  let words: Vec<&str> = sentence.split(' ').filter(|w| !w.is_empty()).collect();
  let chunks: Vec<String> = words.chunks(density.chunk_size()).map(|c| c.join(" ")).collect();
  if chunks.is_empty() {
    vec![sentence.to_string()]
  } else {
    chunks
  }
}

fn build_reading_blocks(input: &GenerateInput) -> Vec<ReadingBlock> {
  split_sentences(&input.passage)
    .into_iter()
    .take(MAX_SENTENCES)
    .enumerate()
    .map(|(i, sentence)| ReadingBlock {
      sentence_no: Number::from(i + 1),
      chunks: sentence_to_chunks(&sentence, input.options.density),
      ko: format!("문장 {}의 핵심 의미를 한국어로 정리한 해석입니다.", i + 1),
      logic_points: vec![
        "핵심 주장과 근거를 연결".to_string(),
        "접속사/지시어로 문장 간 논리 추적".to_string(),
      ],
    })
    .collect()
}

fn build_choice_analysis(input: &GenerateInput) -> Vec<ChoiceAnalysis> {
  if !input.options.include_choice_analysis {
    return Vec::new();
  }

  let answer = input.answer.as_deref().map(str::trim);
  (0..FALLBACK_CHOICES.len())
    .map(|i| {
      let no = i + 1;
      let text = input
        .choices
        .get(i)
        .cloned()
        .unwrap_or_else(|| FALLBACK_CHOICES[i].to_string());
      let verdict = if input.question_type == QuestionType::PassageExplain {
        Verdict::NotApplicable
      } else if answer == Some(no.to_string().as_str()) {
        Verdict::O
      } else {
        Verdict::X
      };
      let reason = match verdict {
        Verdict::NotApplicable => "지문 해설 유형에서는 선지 채점이 필수가 아닙니다.",
        Verdict::O => "지문 근거와 문항 의도를 일치시킵니다.",
        Verdict::X => "핵심 근거와 충돌하거나 문맥상 부적절합니다.",
      };
      ChoiceAnalysis { no: Number::from(no), text, verdict, reason: reason.to_string() }
    })
    .collect()
}

fn build_vocab() -> Vec<VocabItem> {
  VOCAB_SEED
    .iter()
    .map(|(word, meaning, synonyms)| VocabItem {
      word: (*word).to_string(),
      ko_meaning: (*meaning).to_string(),
      synonyms: synonyms
        .iter()
        .map(|w| Synonym { w: (*w).to_string(), ko: format!("{} 관련", meaning) })
        .collect(),
    })
    .collect()
}

pub fn build_mock_response(input: &GenerateInput) -> GenerateResponse {
  GenerateResponse {
    reading_blocks: build_reading_blocks(input),
    solution_logic: SolutionLogic {
      final_answer: "정답은 지문 핵심 논리와 일치하는 선택지입니다.".into(),
      rationale: "지문의 핵심 주장-근거 구조를 기준으로 오답 선지를 제거하고 정답 선지를 확정합니다.".into(),
    },
    choice_analysis: build_choice_analysis(input),
    vocab: build_vocab(),
    one_liner: "핵심은 지문 논리 흐름을 먼저 잡고 선지를 대조하는 것입니다.".into(),
  }
}

fn to_raw(response: &GenerateResponse) -> Result<String, LlmError> {
  serde_json::to_string(response).map_err(|e| LlmError::Internal(e.to_string()))
}

#[async_trait]
impl LlmClient for MockClient {
  fn name(&self) -> &'static str {
    "mock"
  }

  #[instrument(level = "debug", skip(self, input), fields(passage_len = input.passage.len()))]
  async fn generate(&self, input: &GenerateInput) -> Result<String, LlmError> {
    let response = build_mock_response(input);
    debug!(target: "llm", blocks = response.reading_blocks.len(), "Mock response built");
    to_raw(&response)
  }

  #[instrument(level = "debug", skip(self, input, current), fields(section = section.as_str()))]
  async fn regenerate(
    &self,
    input: &GenerateInput,
    current: &GenerateResponse,
    section: RegenerateSection,
  ) -> Result<String, LlmError> {
    let next = match section {
      RegenerateSection::All => build_mock_response(input),
      RegenerateSection::Vocab => GenerateResponse { vocab: build_vocab(), ..current.clone() },
      RegenerateSection::Choices => {
        GenerateResponse { choice_analysis: build_choice_analysis(input), ..current.clone() }
      }
      RegenerateSection::Reading => {
        GenerateResponse { reading_blocks: build_reading_blocks(input), ..current.clone() }
      }
    };
    to_raw(&next)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{GenerateOptions, Pinned};
  use crate::rules::check;
  use crate::schema::parse_generate_response;

  fn input(passage: &str, qt: QuestionType, density: Density, analysis: bool) -> GenerateInput {
    GenerateInput {
      passage: passage.into(),
      question_type: qt,
      choices: vec![],
      answer: None,
      options: GenerateOptions {
        density,
        include_choice_analysis: analysis,
        fixed_vocab_five: Pinned,
        fixed_synonyms_three: Pinned,
        enforce_single_word: Pinned,
      },
    }
  }

  #[test]
  fn sentences_split_on_terminal_punctuation() {
    assert_eq!(
      split_sentences("  Cats are   mammals.  Dogs bark! Do fish\nswim? trailing words"),
      vec!["Cats are mammals.", "Dogs bark!", "Do fish swim?", "trailing words"]
    );
    assert!(split_sentences("   ").is_empty());
    // No whitespace after the period: stays one sentence.
    assert_eq!(split_sentences("e.g.this"), vec!["e.g.this"]);
  }

  #[test]
  fn chunk_size_follows_density() {
    let s = "one two three four five six seven eight";
    assert_eq!(sentence_to_chunks(s, Density::High), vec!["one two three", "four five six", "seven eight"]);
    assert_eq!(sentence_to_chunks(s, Density::Base), vec!["one two three four five", "six seven eight"]);
    assert_eq!(sentence_to_chunks(s, Density::Low), vec!["one two three four five six seven", "eight"]);
  }

  #[test]
  fn reading_blocks_capped_at_eight_sentences() {
    let passage = (1..=10).map(|i| format!("Sentence {i}.")).collect::<Vec<_>>().join(" ");
    let blocks = build_reading_blocks(&input(&passage, QuestionType::Blank, Density::Base, true));
    assert_eq!(blocks.len(), 8);
    assert_eq!(blocks[7].sentence_no, Number::from(8));
  }

  #[test]
  fn verdicts_follow_question_type_and_answer() {
    let mut i = input("Text.", QuestionType::Blank, Density::Base, true);
    i.choices = vec!["a".into(), "b".into()];
    i.answer = Some(" 2 ".into());
    let analysis = build_choice_analysis(&i);
    assert_eq!(analysis.len(), 5);
    assert_eq!(analysis[1].verdict, Verdict::O);
    assert_eq!(analysis[0].verdict, Verdict::X);
    assert_eq!(analysis[1].text, "b");
    assert_eq!(analysis[4].text, "E");

    i.question_type = QuestionType::PassageExplain;
    assert!(build_choice_analysis(&i).iter().all(|c| c.verdict == Verdict::NotApplicable));

    i.options.include_choice_analysis = false;
    assert!(build_choice_analysis(&i).is_empty());
  }

  #[tokio::test]
  async fn passage_explain_example_is_clean() {
    let i = input(
      "Cats are mammals. Dogs are mammals too.",
      QuestionType::PassageExplain,
      Density::Base,
      false,
    );
    let raw = MockClient::new().generate(&i).await.unwrap();
    let data = parse_generate_response(&raw).unwrap();
    assert_eq!(data.reading_blocks.len(), 2);
    assert!(data.choice_analysis.is_empty());
    assert_eq!(data.vocab.len(), 5);
    assert!(check(&data).is_empty());
  }

  #[tokio::test]
  async fn generate_is_deterministic() {
    let i = input("A b c. D e f.", QuestionType::Grammar, Density::High, true);
    let client = MockClient::new();
    assert_eq!(client.generate(&i).await.unwrap(), client.generate(&i).await.unwrap());
  }

  #[tokio::test]
  async fn section_regenerate_replaces_only_that_section() {
    let i = input("Cats are mammals. Dogs are mammals too.", QuestionType::Blank, Density::Base, true);
    let mut current = build_mock_response(&i);
    current.vocab.truncate(2);
    current.reading_blocks[0].ko = "edited".into();
    current.choice_analysis[0].reason = "edited".into();

    let client = MockClient::new();
    let raw = client.regenerate(&i, &current, RegenerateSection::Vocab).await.unwrap();
    let next = parse_generate_response(&raw).unwrap();
    assert_eq!(next.reading_blocks, current.reading_blocks);
    assert_eq!(next.choice_analysis, current.choice_analysis);
    assert_eq!(next.vocab.len(), 5);

    let raw = client.regenerate(&i, &current, RegenerateSection::Reading).await.unwrap();
    let next = parse_generate_response(&raw).unwrap();
    assert_ne!(next.reading_blocks, current.reading_blocks);
    assert_eq!(next.vocab, current.vocab);

    let raw = client.regenerate(&i, &current, RegenerateSection::All).await.unwrap();
    assert_eq!(parse_generate_response(&raw).unwrap(), build_mock_response(&i));
  }
}
