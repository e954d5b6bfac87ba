//! Strict structural validation of raw model output.
//!
//! Parsing happens in three isolated steps:
//!   1. `recover_json_object` strips code fences and slices the outermost `{...}`
//!   2. plain JSON decode into `serde_json::Value`
//!   3. a shape walk that collects every mismatch with its path, then the typed decode
//!
//! Step 1 is the only leniency. The shape itself is exact: missing keys, extra keys,
//! wrong types and unknown enum values are all rejected.

use serde_json::{Map, Value};

use crate::domain::GenerateResponse;

const MAX_REPORTED_ISSUES: usize = 3;

/// Why a raw response could not be accepted as a `GenerateResponse`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseFailure(pub String);

/// One schema mismatch, addressed by a dotted path (`vocab.0.synonyms.1.w`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
  pub path: String,
  pub message: String,
}

enum Shape {
  String,
  /// Any JSON number, integer or not.
  Number,
  Enum(&'static [&'static str]),
  Array(&'static Shape),
  Object(&'static [(&'static str, Shape)]),
}

static READING_BLOCK: Shape = Shape::Object(&[
  ("sentenceNo", Shape::Number),
  ("chunks", Shape::Array(&Shape::String)),
  ("ko", Shape::String),
  ("logicPoints", Shape::Array(&Shape::String)),
]);

static CHOICE_ANALYSIS: Shape = Shape::Object(&[
  ("no", Shape::Number),
  ("text", Shape::String),
  ("verdict", Shape::Enum(&["O", "X", "N/A"])),
  ("reason", Shape::String),
]);

static SYNONYM: Shape = Shape::Object(&[("w", Shape::String), ("ko", Shape::String)]);

static VOCAB_ITEM: Shape = Shape::Object(&[
  ("word", Shape::String),
  ("koMeaning", Shape::String),
  ("synonyms", Shape::Array(&SYNONYM)),
]);

static GENERATE_RESPONSE: Shape = Shape::Object(&[
  ("reading_blocks", Shape::Array(&READING_BLOCK)),
  ("solution_logic", Shape::Object(&[("final", Shape::String), ("rationale", Shape::String)])),
  ("choice_analysis", Shape::Array(&CHOICE_ANALYSIS)),
  ("vocab", Shape::Array(&VOCAB_ITEM)),
  ("one_liner", Shape::String),
]);

fn type_name(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

fn join_path(path: &[String]) -> String {
  if path.is_empty() {
    "root".to_string()
  } else {
    path.join(".")
  }
}

fn push(issues: &mut Vec<SchemaIssue>, path: &[String], message: String) {
  issues.push(SchemaIssue { path: join_path(path), message });
}

fn walk(shape: &Shape, value: &Value, path: &mut Vec<String>, issues: &mut Vec<SchemaIssue>) {
  match shape {
    Shape::String => {
      if !value.is_string() {
        push(issues, path, format!("Expected string, received {}", type_name(value)));
      }
    }
    Shape::Number => {
      if !value.is_number() {
        push(issues, path, format!("Expected number, received {}", type_name(value)));
      }
    }
    Shape::Enum(allowed) => {
      let expected = allowed.iter().map(|a| format!("'{}'", a)).collect::<Vec<_>>().join(" | ");
      match value {
        Value::String(s) if allowed.iter().any(|a| *a == s.as_str()) => {}
        Value::String(s) => push(
          issues,
          path,
          format!("Invalid enum value. Expected {}, received '{}'", expected, s),
        ),
        other => push(issues, path, format!("Expected {}, received {}", expected, type_name(other))),
      }
    }
    Shape::Array(item) => match value {
      Value::Array(items) => {
        for (i, v) in items.iter().enumerate() {
          path.push(i.to_string());
          walk(item, v, path, issues);
          path.pop();
        }
      }
      other => push(issues, path, format!("Expected array, received {}", type_name(other))),
    },
    Shape::Object(fields) => match value {
      Value::Object(map) => walk_object(fields, map, path, issues),
      other => push(issues, path, format!("Expected object, received {}", type_name(other))),
    },
  }
}

fn walk_object(
  fields: &[(&'static str, Shape)],
  map: &Map<String, Value>,
  path: &mut Vec<String>,
  issues: &mut Vec<SchemaIssue>,
) {
  for (name, shape) in fields {
    path.push((*name).to_string());
    match map.get(*name) {
      Some(v) => walk(shape, v, path, issues),
      None => push(issues, path, "Required".to_string()),
    }
    path.pop();
  }

  let unknown: Vec<String> = map
    .keys()
    .filter(|k| !fields.iter().any(|(name, _)| *name == k.as_str()))
    .map(|k| format!("'{}'", k))
    .collect();
  if !unknown.is_empty() {
    push(issues, path, format!("Unrecognized key(s) in object: {}", unknown.join(", ")));
  }
}

/// Every mismatch between `value` and the `GenerateResponse` shape, in field order.
pub fn schema_issues(value: &Value) -> Vec<SchemaIssue> {
  let mut issues = Vec::new();
  walk(&GENERATE_RESPONSE, value, &mut Vec::new(), &mut issues);
  issues
}

fn schema_error_message(issues: &[SchemaIssue]) -> String {
  if issues.is_empty() {
    return "JSON shape does not match GenerateResponse.".to_string();
  }
  let formatted = issues
    .iter()
    .take(MAX_REPORTED_ISSUES)
    .map(|i| format!("{}: {}", i.path, i.message))
    .collect::<Vec<_>>()
    .join("; ");
  format!("JSON schema validation failed ({})", formatted)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
  let head = s.get(..prefix.len())?;
  if head.eq_ignore_ascii_case(prefix) {
    Some(&s[prefix.len()..])
  } else {
    None
  }
}

/// Remove markdown code fences and keep the substring between the first `{` and the
/// last `}`. Text without such a pair is returned trimmed and otherwise untouched.
pub fn recover_json_object(raw: &str) -> &str {
  let mut s = raw.trim();
  if let Some(rest) = strip_prefix_ignore_case(s, "```json") {
    s = rest.trim_start();
  } else if let Some(rest) = s.strip_prefix("```") {
    s = rest.trim_start();
  }
  if let Some(rest) = s.strip_suffix("```") {
    s = rest.trim_end();
  }

  match (s.find('{'), s.rfind('}')) {
    (Some(first), Some(last)) if last > first => s[first..=last].trim(),
    _ => s,
  }
}

/// Parse raw model text into a validated `GenerateResponse`.
pub fn parse_generate_response(raw: &str) -> Result<GenerateResponse, ParseFailure> {
  let text = recover_json_object(raw);
  let value: Value =
    serde_json::from_str(text).map_err(|_| ParseFailure("JSON parse failed.".to_string()))?;

  let issues = schema_issues(&value);
  if !issues.is_empty() {
    return Err(ParseFailure(schema_error_message(&issues)));
  }

  serde_json::from_value::<GenerateResponse>(value).map_err(|_| ParseFailure(schema_error_message(&[])))
}
