//! Rule-based next-action planning.
//!
//! The decision tree is evaluated top to bottom and the first applicable
//! branch wins:
//!
//! 1. low extraction confidence asks for clarification,
//! 2. an unresolved or ambiguous critical slot requests it,
//! 3. a complete request with a tool bound to its intent calls that tool,
//! 4. an urgent message gets a best-effort answer,
//! 5. a sparse request asks for the optional details,
//! 6. anything else gets a plain response.
//!
//! Fallbacks come from a static per-action table. Planning is a pure function
//! of its input; the resulting [`Decision`] is never persisted.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use parley_core::config::PlannerConfig;
use parley_core::domain::decision::{Action, Decision, DecisionScores, ResponseStyle, ToolKind};
use parley_core::domain::entity::{CATEGORY, CUISINE, EXPRESSION, LOCATION, QUERY_TYPE, SEARCH_TERM};
use parley_core::domain::intent::IntentType;
use parley_core::domain::tool::ToolParams;
use parley_core::errors::DialogueError;

use crate::extractor::Extraction;

const URGENCY_TERMS: &[&str] = &["urgent", "now", "asap", "immediately", "quickly", "hurry"];

struct SlotRequirement {
    name: &'static str,
    critical: bool,
    /// Whether a value stored by an earlier turn satisfies the requirement.
    carries_over: bool,
}

const OUTLET_SLOTS: &[SlotRequirement] = &[
    SlotRequirement { name: LOCATION, critical: true, carries_over: true },
    SlotRequirement { name: QUERY_TYPE, critical: false, carries_over: true },
];
const CALCULATION_SLOTS: &[SlotRequirement] =
    &[SlotRequirement { name: EXPRESSION, critical: true, carries_over: false }];
const RESTAURANT_SLOTS: &[SlotRequirement] = &[
    SlotRequirement { name: CUISINE, critical: true, carries_over: true },
    SlotRequirement { name: LOCATION, critical: false, carries_over: true },
];
const PRODUCT_SLOTS: &[SlotRequirement] = &[
    SlotRequirement { name: CATEGORY, critical: true, carries_over: true },
    SlotRequirement { name: SEARCH_TERM, critical: false, carries_over: false },
];

fn slot_requirements(intent: IntentType) -> &'static [SlotRequirement] {
    match intent {
        IntentType::OutletInquiry => OUTLET_SLOTS,
        IntentType::Calculation => CALCULATION_SLOTS,
        IntentType::RestaurantSearch => RESTAURANT_SLOTS,
        IntentType::ProductSearch => PRODUCT_SLOTS,
        IntentType::GeneralQuery => &[],
    }
}

pub struct PlanningInput<'a> {
    pub message: &'a str,
    pub extraction: &'a Extraction,
    /// Slot values already stored for the conversation.
    pub slots: &'a BTreeMap<String, Value>,
    pub registered_tools: &'a [ToolKind],
}

#[derive(Clone, Debug, PartialEq)]
enum SlotState {
    Resolved(Value),
    Ambiguous(Vec<Value>),
    Missing,
}

#[derive(Clone, Debug, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn plan(&self, input: &PlanningInput<'_>) -> Decision {
        let extraction = input.extraction;
        let intent = extraction.intent;
        let states = slot_states(input);

        let scores = DecisionScores {
            completeness: self.completeness(intent, &states),
            tool_relevance: tool_relevance(intent, input.registered_tools),
            urgency: urgency_score(input.message),
        };

        let (primary_action, reasoning) = self.choose(input, &states, &scores);
        let fallback_actions = self.fallbacks_for(&primary_action, intent);

        debug!(
            event_name = "planner.decision",
            intent = intent.as_str(),
            primary_action = primary_action.kind().as_str(),
            fallbacks = fallback_actions.len(),
            completeness = scores.completeness,
            tool_relevance = scores.tool_relevance,
            urgency = scores.urgency,
            "decision planned"
        );

        Decision {
            intent,
            primary_action,
            fallback_actions,
            reasoning,
            confidence: extraction.confidence,
            scores,
        }
    }

    fn choose(
        &self,
        input: &PlanningInput<'_>,
        states: &BTreeMap<&'static str, SlotState>,
        scores: &DecisionScores,
    ) -> (Action, String) {
        let config = &self.config;
        let extraction = input.extraction;
        let intent = extraction.intent;

        if extraction.confidence < config.clarification_threshold {
            return (
                Action::AskClarification { intent },
                format!(
                    "Intent confidence too low ({:.2} < {:.2})",
                    extraction.confidence, config.clarification_threshold
                ),
            );
        }

        let mut missing_critical = Vec::new();
        let mut candidates = BTreeMap::new();
        for requirement in slot_requirements(intent).iter().filter(|slot| slot.critical) {
            match states.get(requirement.name) {
                Some(SlotState::Resolved(_)) => {}
                Some(SlotState::Ambiguous(values)) => {
                    missing_critical.push(requirement.name.to_string());
                    candidates.insert(requirement.name.to_string(), values.clone());
                }
                Some(SlotState::Missing) | None => {
                    missing_critical.push(requirement.name.to_string())
                }
            }
        }
        if !missing_critical.is_empty() {
            let reasoning = if candidates.is_empty() {
                format!("Cannot proceed without: {}", missing_critical.join(", "))
            } else {
                let names: Vec<_> = candidates.keys().cloned().collect();
                format!("Several candidates for: {}", names.join(", "))
            };
            return (
                Action::RequestMissingInfo { intent, missing: missing_critical, candidates },
                reasoning,
            );
        }

        if scores.completeness >= config.tool_completeness_threshold
            && scores.tool_relevance > config.tool_relevance_threshold
        {
            if let Some(tool) = ToolKind::for_intent(intent) {
                return (
                    Action::CallTool { tool, params: tool_params(intent, states) },
                    format!(
                        "Executing {} (completeness {:.2}, tool relevance {:.2})",
                        tool.name(),
                        scores.completeness,
                        scores.tool_relevance
                    ),
                );
            }
        }

        if scores.urgency > config.urgency_threshold {
            return (
                Action::ProvideResponse { intent, style: ResponseStyle::BestEffort },
                format!("Urgent response required (urgency {:.2})", scores.urgency),
            );
        }

        if scores.completeness < config.low_completeness_threshold {
            let missing: Vec<String> = slot_requirements(intent)
                .iter()
                .filter(|slot| !matches!(states.get(slot.name), Some(SlotState::Resolved(_))))
                .map(|slot| slot.name.to_string())
                .collect();
            let reasoning = format!("Could benefit from additional info: {}", missing.join(", "));
            return (
                Action::RequestMissingInfo { intent, missing, candidates: BTreeMap::new() },
                reasoning,
            );
        }

        (
            Action::ProvideResponse { intent, style: ResponseStyle::Informative },
            "Providing response with available information".to_string(),
        )
    }

    fn fallbacks_for(&self, primary: &Action, intent: IntentType) -> Vec<Action> {
        match primary {
            Action::CallTool { .. } => {
                let mut fallbacks = Vec::with_capacity(3);
                if self.config.retry_tool_on_failure {
                    fallbacks.push(primary.clone());
                }
                fallbacks.push(Action::ProvideResponse {
                    intent,
                    style: ResponseStyle::PartialInformation,
                });
                fallbacks.push(Action::AskClarification { intent });
                fallbacks
            }
            Action::AskClarification { .. } => {
                vec![Action::ProvideResponse { intent, style: ResponseStyle::GenericHelp }]
            }
            Action::RequestMissingInfo { .. } => vec![Action::AskClarification { intent }],
            Action::ProvideResponse { style: ResponseStyle::BestEffort, .. } => {
                vec![Action::ProvideResponse { intent, style: ResponseStyle::GenericHelp }]
            }
            Action::ProvideResponse { .. } => Vec::new(),
        }
    }

    /// Weighted share of the intent's slots that are resolved. Critical slots
    /// weigh 1.0, optional ones the configured weight. Intents without slots
    /// are complete.
    fn completeness(&self, intent: IntentType, states: &BTreeMap<&'static str, SlotState>) -> f64 {
        let requirements = slot_requirements(intent);
        let weight = |slot: &SlotRequirement| {
            if slot.critical {
                1.0
            } else {
                self.config.optional_slot_weight
            }
        };

        let total: f64 = requirements.iter().map(weight).sum();
        if total <= 0.0 {
            return 1.0;
        }
        let resolved: f64 = requirements
            .iter()
            .filter(|slot| matches!(states.get(slot.name), Some(SlotState::Resolved(_))))
            .map(weight)
            .sum();
        resolved / total
    }
}

fn slot_states(input: &PlanningInput<'_>) -> BTreeMap<&'static str, SlotState> {
    let entities = &input.extraction.entities;
    let resolved = entities.resolved();
    let ambiguous = entities.ambiguous();

    slot_requirements(input.extraction.intent)
        .iter()
        .map(|requirement| {
            let state = if let Some(value) = resolved.get(requirement.name) {
                SlotState::Resolved(value.clone())
            } else if let Some(values) = ambiguous.get(requirement.name) {
                SlotState::Ambiguous(values.clone())
            } else if let Some(value) =
                input.slots.get(requirement.name).filter(|_| requirement.carries_over)
            {
                SlotState::Resolved(value.clone())
            } else {
                SlotState::Missing
            };
            (requirement.name, state)
        })
        .collect()
}

/// 1.0 when a registered tool is bound to the intent, otherwise 0.0.
fn tool_relevance(intent: IntentType, registered: &[ToolKind]) -> f64 {
    let bound = ToolKind::for_intent(intent).is_some_and(|tool| registered.contains(&tool));
    if bound {
        1.0
    } else {
        0.0
    }
}

fn tool_params(intent: IntentType, states: &BTreeMap<&'static str, SlotState>) -> ToolParams {
    slot_requirements(intent).iter().fold(ToolParams::new(), |params, requirement| {
        match states.get(requirement.name) {
            Some(SlotState::Resolved(value)) => params.with(requirement.name, value_text(value)),
            _ => params,
        }
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Time-pressure heuristic: 0.3 per urgency keyword, 0.2 for repeated
/// question marks, 0.1 per exclamation mark, capped at 1.0.
pub fn urgency_score(message: &str) -> f64 {
    let lowered = message.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    let keywords = words.iter().filter(|word| URGENCY_TERMS.contains(word)).count();
    let questions = message.matches('?').count();
    let exclamations = message.matches('!').count();

    let mut score = 0.3 * keywords as f64 + 0.1 * exclamations as f64;
    if questions > 1 {
        score += 0.2;
    }
    score.min(1.0)
}

/// Conversational failures a decision absorbs instead of raising.
pub fn absorbed_errors(decision: &Decision) -> Vec<DialogueError> {
    match &decision.primary_action {
        Action::AskClarification { intent } => vec![DialogueError::ExtractionAmbiguity(format!(
            "{} at confidence {:.2}",
            intent.as_str(),
            decision.confidence
        ))],
        Action::RequestMissingInfo { missing, candidates, .. } => missing
            .iter()
            .map(|slot| {
                if candidates.contains_key(slot) {
                    DialogueError::ExtractionAmbiguity(format!("several candidates for `{slot}`"))
                } else {
                    DialogueError::MissingSlot(slot.clone())
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}
