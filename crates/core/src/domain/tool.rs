use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed tool parameter. Tools receive these as bound values and never
/// splice them into command or query text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            Self::Number(_) => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolParams(pub BTreeMap<String, ParamValue>);

impl ToolParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorKind {
    MissingParam,
    UpstreamUnavailable,
    Timeout,
    ValidationFailed,
    UnsafeInput,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingParam => "MISSING_PARAM",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::UnsafeInput => "UNSAFE_INPUT",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    /// Set when the tool broke its own contract (it panicked) rather than
    /// reporting an error.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub contract_violation: bool,
    pub latency_ms: u64,
}

impl ToolCallResult {
    pub fn success(data: Value, latency_ms: u64) -> Self {
        Self { ok: true, data: Some(data), error_kind: None, contract_violation: false, latency_ms }
    }

    pub fn failure(error_kind: ToolErrorKind, latency_ms: u64) -> Self {
        Self {
            ok: false,
            data: None,
            error_kind: Some(error_kind),
            contract_violation: false,
            latency_ms,
        }
    }

    pub fn contract_violation(error_kind: ToolErrorKind, latency_ms: u64) -> Self {
        Self { contract_violation: true, ..Self::failure(error_kind, latency_ms) }
    }

    /// Failures that mean the plan or the tool is broken, so no fallback can
    /// recover: a missing parameter or a violated tool contract.
    pub fn is_hard_failure(&self) -> bool {
        !self.ok
            && (self.contract_violation || self.error_kind == Some(ToolErrorKind::MissingParam))
    }
}
