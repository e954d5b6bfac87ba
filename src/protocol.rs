//! Public HTTP request/response structs (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{
    GenerateInput, GenerateResponse, RegenerateSection, RuleViolation, ViolationCode,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateApiRequest {
    pub input: GenerateInput,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegenerateApiRequest {
    pub section: RegenerateSection,
    pub input: GenerateInput,
    pub current: GenerateResponse,
}

/// Envelope shared by both endpoints.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<GenerateResponse>,
    pub violations: Vec<RuleViolation>,
    pub auto_regenerated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GenerateApiResponse {
    pub fn success(data: GenerateResponse, violations: Vec<RuleViolation>, auto_regenerated: bool) -> Self {
        Self { ok: true, data: Some(data), violations, auto_regenerated, message: None }
    }

    pub fn failure(violations: Vec<RuleViolation>, auto_regenerated: bool, message: &str) -> Self {
        Self {
            ok: false,
            data: None,
            violations,
            auto_regenerated,
            message: Some(message.to_string()),
        }
    }

    /// Failure carrying exactly one error violation.
    pub fn single_error(code: ViolationCode, violation_message: &str, path: Option<&str>, message: &str) -> Self {
        Self::failure(
            vec![RuleViolation::error(code, violation_message, path.map(String::from))],
            false,
            message,
        )
    }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub backend: &'static str,
}
