//! Parameter screening at the tool-call boundary.
//!
//! Tools receive typed, bound values only. The guard rejects values that carry
//! statement terminators, comment openers or control characters before any
//! tool runs; a rejected call never reaches the tool. Arithmetic parameters
//! may contain operator runs such as `5--3`, which read as comment markers
//! elsewhere.

use parley_core::domain::entity::EXPRESSION;
use parley_core::domain::tool::{ParamValue, ToolParams};

const OPERATOR_RUNS: [&str; 3] = ["--", "/*", "*/"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { param: String, reason_code: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_value_len: usize,
    pub forbidden_sequences: Vec<&'static str>,
    pub arithmetic_params: Vec<&'static str>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            max_value_len: 256,
            forbidden_sequences: vec![";", "--", "/*", "*/", "\\"],
            arithmetic_params: vec![EXPRESSION],
        }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, params: &ToolParams) -> GuardrailDecision {
        for (name, value) in params.iter() {
            let reason_code = match value {
                ParamValue::Text(text) => self.screen_text(name, text),
                ParamValue::Number(number) if !number.is_finite() => Some("non_finite_number"),
                ParamValue::Number(_) => None,
            };

            if let Some(reason_code) = reason_code {
                return GuardrailDecision::Deny { param: name.clone(), reason_code };
            }
        }
        GuardrailDecision::Allow
    }

    fn screen_text(&self, name: &str, text: &str) -> Option<&'static str> {
        if text.chars().count() > self.max_value_len {
            return Some("value_too_long");
        }
        if text.chars().any(char::is_control) {
            return Some("control_character");
        }
        let arithmetic = self.arithmetic_params.iter().any(|param| *param == name);
        let forbidden = self
            .forbidden_sequences
            .iter()
            .filter(|&&sequence| !(arithmetic && OPERATOR_RUNS.contains(&sequence)))
            .any(|sequence| text.contains(sequence));
        if forbidden {
            return Some("forbidden_sequence");
        }
        None
    }
}
