//! Carries out a [`Decision`] with ordered fallback.
//!
//! Outcomes of a tool attempt:
//! - success: the rendered answer is returned and the chain stops,
//! - soft failure (upstream error, timeout, validation, unsafe input): the
//!   next fallback action is tried,
//! - hard failure (a broken tool contract such as a missing parameter, a
//!   panicking tool or an undecodable payload): the chain is abandoned.
//!
//! A chain that ends without an answer yields [`LAST_RESORT_RESPONSE`], so
//! the caller always gets text back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use parley_core::domain::decision::{Action, ActionKind, Decision, ToolKind};
use parley_core::domain::intent::IntentType;
use parley_core::domain::tool::ToolErrorKind;
use parley_core::errors::DialogueError;

use crate::responses::{self, LAST_RESORT_RESPONSE};
use crate::tools::ToolRegistry;

/// What the executor may draw on when phrasing a response.
pub struct ResponseContext<'a> {
    pub intent: IntentType,
    /// Stored slot values overlaid with this turn's resolved entities.
    pub known: &'a BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    SoftFailure,
    HardFailure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::SoftFailure => "soft_failure",
            Self::HardFailure => "hard_failure",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionAttempt {
    pub action: ActionKind,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    pub latency_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub tool: ToolKind,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionOutcome {
    pub response: String,
    pub answered_by: Option<Action>,
    pub tool_output: Option<ToolOutput>,
    pub attempts: Vec<ActionAttempt>,
    pub fallback_used: bool,
    pub exhausted: bool,
    pub errors: Vec<DialogueError>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.exhausted
    }
}

enum AttemptResult {
    Answered { response: String, tool_output: Option<ToolOutput> },
    Soft(DialogueError, ToolErrorKind),
    Hard(DialogueError, ToolErrorKind),
}

pub struct Executor {
    registry: Arc<ToolRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        decision: &Decision,
        context: &ResponseContext<'_>,
    ) -> ExecutionOutcome {
        let mut attempts = Vec::new();
        let mut errors = Vec::new();

        for (position, action) in decision.attempt_order().enumerate() {
            let started = Instant::now();
            let result = self.attempt(action, context).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let (outcome, error_kind) = match &result {
                AttemptResult::Answered { .. } => (AttemptOutcome::Succeeded, None),
                AttemptResult::Soft(_, kind) => (AttemptOutcome::SoftFailure, Some(*kind)),
                AttemptResult::Hard(_, kind) => (AttemptOutcome::HardFailure, Some(*kind)),
            };
            info!(
                event_name = "executor.attempt",
                intent = decision.intent.as_str(),
                action = action.kind().as_str(),
                position,
                outcome = outcome.as_str(),
                error_kind = error_kind.map(|kind| kind.as_str()),
                latency_ms,
                "action attempted"
            );
            attempts.push(ActionAttempt { action: action.kind(), outcome, error_kind, latency_ms });

            match result {
                AttemptResult::Answered { response, tool_output } => {
                    return ExecutionOutcome {
                        response,
                        answered_by: Some(action.clone()),
                        tool_output,
                        attempts,
                        fallback_used: position > 0,
                        exhausted: false,
                        errors,
                    };
                }
                AttemptResult::Soft(error, _) => errors.push(error),
                AttemptResult::Hard(error, _) => {
                    errors.push(error);
                    break;
                }
            }
        }

        warn!(
            event_name = "executor.exhausted",
            intent = decision.intent.as_str(),
            attempts = attempts.len(),
            error_class = errors.first().map(DialogueError::error_class),
            error_kind = attempts
                .iter()
                .find_map(|attempt| attempt.error_kind)
                .map(|kind| kind.as_str()),
            "fallback chain exhausted; sending last-resort response"
        );
        ExecutionOutcome {
            response: LAST_RESORT_RESPONSE.to_string(),
            answered_by: None,
            tool_output: None,
            fallback_used: attempts.len() > 1,
            attempts,
            exhausted: true,
            errors,
        }
    }

    async fn attempt(&self, action: &Action, context: &ResponseContext<'_>) -> AttemptResult {
        match action {
            Action::CallTool { tool, params } => {
                let result = self.registry.call(tool.name(), params).await;
                if !result.ok {
                    let kind = result.error_kind.unwrap_or(ToolErrorKind::UpstreamUnavailable);
                    let error = DialogueError::from_tool_error(tool.name(), kind);
                    return if result.is_hard_failure() {
                        AttemptResult::Hard(error, kind)
                    } else {
                        AttemptResult::Soft(error, kind)
                    };
                }

                let data = result.data.unwrap_or(Value::Null);
                match responses::tool_response(*tool, &data) {
                    Ok(response) => AttemptResult::Answered {
                        response,
                        tool_output: Some(ToolOutput { tool: *tool, data }),
                    },
                    Err(_) => {
                        let kind = ToolErrorKind::ValidationFailed;
                        AttemptResult::Hard(DialogueError::from_tool_error(tool.name(), kind), kind)
                    }
                }
            }
            Action::AskClarification { intent } => AttemptResult::Answered {
                response: responses::clarification(*intent),
                tool_output: None,
            },
            Action::RequestMissingInfo { missing, candidates, .. } => AttemptResult::Answered {
                response: responses::missing_info(missing, candidates),
                tool_output: None,
            },
            Action::ProvideResponse { intent, style } => AttemptResult::Answered {
                response: responses::provide(*intent, *style, context.known),
                tool_output: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use parley_core::domain::decision::{
        Action, ActionKind, Decision, DecisionScores, ResponseStyle, ToolKind,
    };
    use parley_core::domain::intent::IntentType;
    use parley_core::domain::tool::{ToolErrorKind, ToolParams};
    use parley_core::errors::DialogueError;

    use super::{AttemptOutcome, Executor, ResponseContext};
    use crate::responses::LAST_RESORT_RESPONSE;
    use crate::tools::test_tools::{FailingTool, PanickingTool, SlowTool};
    use crate::tools::{CalculatorTool, ToolRegistry};

    fn decision(primary: Action, fallbacks: Vec<Action>) -> Decision {
        Decision {
            intent: IntentType::Calculation,
            primary_action: primary,
            fallback_actions: fallbacks,
            reasoning: "test".to_string(),
            confidence: 0.9,
            scores: DecisionScores::default(),
        }
    }

    fn calculate(expression: &str) -> Action {
        Action::CallTool {
            tool: ToolKind::Calculator,
            params: ToolParams::new().with("expression", expression),
        }
    }

    fn partial() -> Action {
        Action::ProvideResponse {
            intent: IntentType::Calculation,
            style: ResponseStyle::PartialInformation,
        }
    }

    fn executor(registry: ToolRegistry) -> Executor {
        Executor::new(Arc::new(registry))
    }

    fn calculator_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(CalculatorTool);
        registry
    }

    #[tokio::test]
    async fn successful_tool_stops_the_chain() {
        let known = BTreeMap::new();
        let context = ResponseContext { intent: IntentType::Calculation, known: &known };

        let outcome = executor(calculator_registry())
            .execute(&decision(calculate("25 + 15"), vec![partial()]), &context)
            .await;

        assert_eq!(outcome.response, "The result of 25 + 15 is 40.");
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.attempts.len(), 1);
        let answered_by = outcome.tool_output.as_ref().map(|output| output.tool);
        assert_eq!(answered_by, Some(ToolKind::Calculator));
    }

    #[tokio::test]
    async fn timeout_advances_to_the_next_fallback() {
        let mut registry = ToolRegistry::new(Duration::from_millis(20));
        registry.register(SlowTool { kind: ToolKind::Calculator, delay: Duration::from_secs(5) });
        let known = BTreeMap::new();
        let context = ResponseContext { intent: IntentType::Calculation, known: &known };

        let outcome = executor(registry)
            .execute(&decision(calculate("1 + 1"), vec![partial()]), &context)
            .await;

        assert!(!outcome.response.is_empty());
        assert!(outcome.response.starts_with("I couldn't complete the calculation"));
        assert!(outcome.fallback_used);
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts[0].error_kind, Some(ToolErrorKind::Timeout));
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::SoftFailure);
        assert_eq!(outcome.attempts[1].action, ActionKind::ProvideResponse);
        assert_eq!(
            outcome.errors,
            vec![DialogueError::ToolTimeout { tool: "calculator".to_string() }]
        );
    }

    #[tokio::test]
    async fn validation_failure_is_soft() {
        let known = BTreeMap::new();
        let context = ResponseContext { intent: IntentType::Calculation, known: &known };

        let outcome = executor(calculator_registry())
            .execute(&decision(calculate("1 / 0"), vec![partial()]), &context)
            .await;

        assert!(outcome.fallback_used);
        assert_eq!(outcome.attempts[0].error_kind, Some(ToolErrorKind::ValidationFailed));
        assert_eq!(outcome.answered_by, Some(partial()));
    }

    #[tokio::test]
    async fn exhausted_chain_returns_the_last_resort_response() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(FailingTool {
            kind: ToolKind::Calculator,
            error_kind: ToolErrorKind::UpstreamUnavailable,
        });
        let known = BTreeMap::new();
        let context = ResponseContext { intent: IntentType::Calculation, known: &known };

        let outcome = executor(registry)
            .execute(&decision(calculate("1 + 1"), vec![calculate("1 + 1")]), &context)
            .await;

        assert_eq!(outcome.response, LAST_RESORT_RESPONSE);
        assert!(outcome.exhausted);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome
            .attempts
            .iter()
            .all(|attempt| attempt.outcome == AttemptOutcome::SoftFailure));
    }

    #[tokio::test]
    async fn hard_failure_abandons_remaining_fallbacks() {
        let known = BTreeMap::new();
        let context = ResponseContext { intent: IntentType::Calculation, known: &known };
        let broken = Action::CallTool { tool: ToolKind::Calculator, params: ToolParams::new() };

        let outcome = executor(calculator_registry())
            .execute(&decision(broken, vec![partial()]), &context)
            .await;

        assert_eq!(outcome.response, LAST_RESORT_RESPONSE);
        assert!(outcome.exhausted);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::HardFailure);
        assert_eq!(outcome.attempts[0].error_kind, Some(ToolErrorKind::MissingParam));
    }

    #[tokio::test]
    async fn panicking_tool_is_a_hard_failure() {
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        registry.register(PanickingTool);
        let known = BTreeMap::new();
        let context = ResponseContext { intent: IntentType::ProductSearch, known: &known };
        let search = Action::CallTool { tool: ToolKind::ProductSearch, params: ToolParams::new() };

        let outcome =
            executor(registry).execute(&decision(search, vec![partial()]), &context).await;

        assert_eq!(outcome.response, LAST_RESORT_RESPONSE);
        assert!(outcome.exhausted);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::HardFailure);
        assert_eq!(outcome.attempts[0].error_kind, Some(ToolErrorKind::UpstreamUnavailable));
    }
}
