//! Process-wide settings: upstream credential, timeout/retry knobs and pipeline toggles.
//!
//! Resolution order (later wins): built-in defaults, optional TOML file at
//! GENERATOR_CONFIG_PATH, environment variables. Settings are resolved once at
//! startup and are immutable afterwards.
//!
//! Example TOML:
//!
//! ```toml
//! [gemini]
//! model = "gemini-2.5-flash"
//! timeout_ms = 15000
//! max_retries = 1
//!
//! [generator]
//! auto_retry_parse = true
//! auto_regenerate_rule_errors = false
//! ```

use serde::Deserialize;
use tracing::{error, info};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 700;
pub const DEFAULT_THINKING_BUDGET: u32 = 0;

/// Upstream LLM settings. `api_key` selects the networked backend when present.
#[derive(Clone)]
pub struct GeminiSettings {
  pub api_key: Option<String>,
  pub model: String,
  pub base_url: String,
  pub timeout_ms: u64,
  pub max_retries: u32,
  pub retry_base_delay_ms: u64,
  pub thinking_budget: u32,
  pub max_output_tokens: Option<u32>,
  pub log_usage: bool,
}

// Hand-written so the credential never ends up in logs.
impl std::fmt::Debug for GeminiSettings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GeminiSettings")
      .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
      .field("model", &self.model)
      .field("base_url", &self.base_url)
      .field("timeout_ms", &self.timeout_ms)
      .field("max_retries", &self.max_retries)
      .field("retry_base_delay_ms", &self.retry_base_delay_ms)
      .field("thinking_budget", &self.thinking_budget)
      .field("max_output_tokens", &self.max_output_tokens)
      .field("log_usage", &self.log_usage)
      .finish()
  }
}

/// Repair-ladder toggles for full generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineFlags {
  pub auto_retry_parse: bool,
  pub auto_regenerate_rule_errors: bool,
}

impl Default for PipelineFlags {
  fn default() -> Self {
    Self { auto_retry_parse: true, auto_regenerate_rule_errors: true }
  }
}

#[derive(Clone, Debug)]
pub struct Settings {
  pub gemini: GeminiSettings,
  pub pipeline: PipelineFlags,
}

/// Optional TOML overlay. Every field may be omitted.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
  #[serde(default)]
  pub gemini: GeminiFileConfig,
  #[serde(default)]
  pub generator: GeneratorFileConfig,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GeminiFileConfig {
  #[serde(default)] pub api_key: Option<String>,
  #[serde(default)] pub model: Option<String>,
  #[serde(default)] pub base_url: Option<String>,
  #[serde(default)] pub timeout_ms: Option<u64>,
  #[serde(default)] pub max_retries: Option<u32>,
  #[serde(default)] pub retry_base_delay_ms: Option<u64>,
  #[serde(default)] pub thinking_budget: Option<u32>,
  #[serde(default)] pub max_output_tokens: Option<u32>,
  #[serde(default)] pub log_usage: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GeneratorFileConfig {
  #[serde(default)] pub auto_retry_parse: Option<bool>,
  #[serde(default)] pub auto_regenerate_rule_errors: Option<bool>,
}

impl Settings {
  /// Resolve settings from the process environment (and the TOML file it points to).
  pub fn from_env() -> Self {
    let file = load_file_config_from_env().unwrap_or_default();
    Self::resolve(&file, |name| std::env::var(name).ok())
  }

  /// Resolve settings from a file overlay and an arbitrary variable lookup.
  pub fn resolve(file: &FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
    let g = &file.gemini;

    let api_key = env("GEMINI_API_KEY")
      .or_else(|| g.api_key.clone())
      .filter(|k| !k.trim().is_empty());

    let log_usage = parse_bool(env("GEMINI_LOG_USAGE").as_deref())
      .or(g.log_usage)
      .unwrap_or_else(|| env("APP_ENV").as_deref() == Some("development"));

    let gemini = GeminiSettings {
      api_key,
      model: env("GEMINI_MODEL").or_else(|| g.model.clone()).unwrap_or_else(|| DEFAULT_MODEL.into()),
      base_url: env("GEMINI_API_BASE_URL")
        .or_else(|| g.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
      timeout_ms: number_setting(env("GEMINI_TIMEOUT_MS").as_deref(), g.timeout_ms, DEFAULT_TIMEOUT_MS, 1),
      max_retries: number_setting(env("GEMINI_MAX_RETRIES").as_deref(), g.max_retries, DEFAULT_MAX_RETRIES, 0),
      retry_base_delay_ms: number_setting(
        env("GEMINI_RETRY_BASE_DELAY_MS").as_deref(),
        g.retry_base_delay_ms,
        DEFAULT_RETRY_BASE_DELAY_MS,
        1,
      ),
      thinking_budget: number_setting(
        env("GEMINI_THINKING_BUDGET").as_deref(),
        g.thinking_budget,
        DEFAULT_THINKING_BUDGET,
        0,
      ),
      max_output_tokens: match env("GEMINI_MAX_OUTPUT_TOKENS") {
        Some(raw) => parse_number::<u32>(&raw, 1),
        None => g.max_output_tokens.filter(|v| *v >= 1),
      },
      log_usage,
    };

    let defaults = PipelineFlags::default();
    let gen = &file.generator;
    let pipeline = PipelineFlags {
      auto_retry_parse: parse_bool(env("GENERATOR_AUTO_RETRY_PARSE").as_deref())
        .or(gen.auto_retry_parse)
        .unwrap_or(defaults.auto_retry_parse),
      auto_regenerate_rule_errors: parse_bool(env("GENERATOR_AUTO_REGENERATE_RULE_ERRORS").as_deref())
        .or(gen.auto_regenerate_rule_errors)
        .unwrap_or(defaults.auto_regenerate_rule_errors),
    };

    Self { gemini, pipeline }
  }
}

/// Only the literal strings `true` and `false` count; anything else means "unset".
fn parse_bool(raw: Option<&str>) -> Option<bool> {
  match raw {
    Some("true") => Some(true),
    Some("false") => Some(false),
    _ => None,
  }
}

/// Parse a finite number, floor it, and reject values below `min`.
fn parse_number<T: TryFrom<u64>>(raw: &str, min: u64) -> Option<T> {
  let value: f64 = raw.trim().parse().ok()?;
  if !value.is_finite() {
    return None;
  }
  let floored = value.floor();
  if floored < min as f64 || floored > u64::MAX as f64 {
    return None;
  }
  T::try_from(floored as u64).ok()
}

fn number_setting<T>(raw: Option<&str>, file: Option<T>, default: T, min: u64) -> T
where
  T: TryFrom<u64> + Into<u64> + Copy,
{
  let from_file = file.filter(|v| (*v).into() >= min);
  match raw {
    Some(raw) => parse_number(raw, min).or(from_file).unwrap_or(default),
    None => from_file.unwrap_or(default),
  }
}

/// Attempt to load `FileConfig` from GENERATOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_file_config_from_env() -> Option<FileConfig> {
  let path = std::env::var("GENERATOR_CONFIG_PATH").ok()?;
  load_file_config(&path)
}

pub fn load_file_config(path: &str) -> Option<FileConfig> {
  match std::fs::read_to_string(path) {
    Ok(s) => match toml::from_str::<FileConfig>(&s) {
      Ok(cfg) => {
        info!(target: "passage_forge", %path, "Loaded generator config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "passage_forge", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "passage_forge", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
