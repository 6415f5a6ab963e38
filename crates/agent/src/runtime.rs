//! The per-message dialogue loop.
//!
//! `submit_message` holds the conversation's lock from the moment it reads
//! the prior turn until the new turn is committed, so turn N is fully stored
//! before turn N+1 of the same conversation starts. `explain_decision` runs
//! extraction and planning on a snapshot and never writes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use parley_core::config::AppConfig;
use parley_core::domain::conversation::{
    ConversationId, ConversationMemory, SlotDelta, Turn, TurnEffects, OUTSTANDING_SLOTS_KEY,
    PENDING_INTENT_KEY,
};
use parley_core::domain::decision::{Action, ActionKind, Decision, ToolKind};
use parley_core::domain::intent::IntentType;
use parley_core::errors::DialogueError;
use parley_db::{ConversationStore, OutletDirectory, StoreError};

use crate::executor::{ActionAttempt, ExecutionOutcome, Executor, ResponseContext};
use crate::extractor::{Extraction, IntentExtractor};
use crate::planner::{absorbed_errors, Planner, PlanningInput};
use crate::responses::PERSISTENCE_FAILURE_RESPONSE;
use crate::tools::catalog::{ProductSearchResult, RestaurantSearchResult};
use crate::tools::outlet::OutletSearchResult;
use crate::tools::{
    CalculatorTool, OutletSearchTool, ProductSearchTool, RestaurantSearchTool, ToolRegistry,
};

pub const LAST_OUTLET_SLOT: &str = "last_outlet";
pub const LAST_SEARCH_SLOT: &str = "last_search";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnTrace {
    pub correlation_id: String,
    pub intent: IntentType,
    pub confidence: f64,
    pub rule: &'static str,
    pub entities: BTreeMap<String, Value>,
    pub primary_action: ActionKind,
    pub reasoning: String,
    pub attempts: Vec<ActionAttempt>,
    pub fallback_used: bool,
    pub exhausted: bool,
    pub error_classes: Vec<&'static str>,
    pub committed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubmitResponse {
    pub response: String,
    pub conversation_id: String,
    pub trace: Option<TurnTrace>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecisionExplanation {
    pub extraction: Extraction,
    pub decision: Decision,
    pub reasoning: String,
}

pub struct DialogueRuntime {
    store: Arc<ConversationStore>,
    extractor: IntentExtractor,
    planner: Planner,
    executor: Executor,
}

impl DialogueRuntime {
    pub fn new(store: Arc<ConversationStore>, registry: ToolRegistry, config: &AppConfig) -> Self {
        Self {
            store,
            extractor: IntentExtractor::new(config.extractor.clone()),
            planner: Planner::new(config.planner.clone()),
            executor: Executor::new(Arc::new(registry)),
        }
    }

    /// Runtime wired with the calculator, outlet directory and catalogs.
    pub fn with_builtin_tools(
        store: Arc<ConversationStore>,
        outlets: Arc<dyn OutletDirectory>,
        config: &AppConfig,
    ) -> Self {
        Self::new(store, builtin_registry(outlets, config), config)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    /// Always answers. A closed, unknown or foreign conversation id starts a
    /// new conversation for the user; a storage failure answers with a
    /// generic apology and leaves stored state untouched.
    pub async fn submit_message(
        &self,
        user_id: &str,
        message: &str,
        conversation_id: Option<&str>,
    ) -> SubmitResponse {
        let correlation_id = Uuid::new_v4().to_string();

        let id = match self.resolve_conversation(user_id, conversation_id).await {
            Ok(id) => id,
            Err(error) => {
                return self.persistence_failure(
                    &correlation_id,
                    conversation_id.unwrap_or_default(),
                    &error,
                )
            }
        };

        let guard = self.store.lock(&id).await;
        let memory = match self.store.get(guard.id()).await {
            Ok(memory) => memory,
            Err(error) => return self.persistence_failure(&correlation_id, &id.0, &error),
        };

        let extraction = self.extractor.extract(message, &memory.prior_turn_summary());
        let slots = memory.slot_values();
        let registered = self.executor.registry().registered();
        let decision = self.planner.plan(&PlanningInput {
            message,
            extraction: &extraction,
            slots: &slots,
            registered_tools: &registered,
        });

        let known = known_values(&slots, &extraction);
        let outcome = self
            .executor
            .execute(&decision, &ResponseContext { intent: extraction.intent, known: &known })
            .await;

        let turn = Turn::new(
            message,
            outcome.response.clone(),
            extraction.intent,
            extraction.entities.clone(),
            extraction.confidence,
        );
        let effects = turn_effects(&turn, &outcome);

        let mut errors = absorbed_errors(&decision);
        errors.extend(outcome.errors.iter().cloned());

        let (response, committed) =
            match self.store.commit_turn_locked(&guard, turn, effects).await {
                Ok(memory) => {
                    info!(
                        event_name = "dialogue.turn.committed",
                        correlation_id = %correlation_id,
                        conversation_id = %memory.id,
                        intent = extraction.intent.as_str(),
                        primary_action = decision.primary_kind().as_str(),
                        fallback_used = outcome.fallback_used,
                        turn_count = memory.turns.len(),
                        "dialogue turn committed"
                    );
                    (outcome.response.clone(), true)
                }
                Err(error) => {
                    warn!(
                        event_name = "dialogue.turn.persistence_failed",
                        correlation_id = %correlation_id,
                        conversation_id = %id,
                        error_class = error.error_class(),
                        error = %error,
                        "turn could not be stored"
                    );
                    errors.push(DialogueError::PersistenceFailure(error.to_string()));
                    (PERSISTENCE_FAILURE_RESPONSE.to_string(), false)
                }
            };

        SubmitResponse {
            response,
            conversation_id: id.0.clone(),
            trace: Some(TurnTrace {
                correlation_id,
                intent: extraction.intent,
                confidence: extraction.confidence,
                rule: extraction.rule,
                entities: extraction.entities.to_flat(),
                primary_action: decision.primary_kind(),
                reasoning: decision.reasoning.clone(),
                attempts: outcome.attempts,
                fallback_used: outcome.fallback_used,
                exhausted: outcome.exhausted,
                error_classes: errors.iter().map(DialogueError::error_class).collect(),
                committed,
            }),
        }
    }

    /// Extraction and planning only. Reads a snapshot of the conversation
    /// when one is given and never executes tools or writes.
    pub async fn explain_decision(
        &self,
        user_id: &str,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<DecisionExplanation, DialogueError> {
        let snapshot = match conversation_id {
            Some(raw) => self
                .store
                .find(&ConversationId(raw.to_string()))
                .await
                .map_err(|error| DialogueError::PersistenceFailure(error.to_string()))?
                .filter(|memory| memory.user_id == user_id),
            None => None,
        };
        let memory = snapshot.unwrap_or_else(|| ConversationMemory::new(user_id));

        let extraction = self.extractor.extract(message, &memory.prior_turn_summary());
        let slots = memory.slot_values();
        let registered = self.executor.registry().registered();
        let decision = self.planner.plan(&PlanningInput {
            message,
            extraction: &extraction,
            slots: &slots,
            registered_tools: &registered,
        });

        Ok(DecisionExplanation { reasoning: decision.reasoning.clone(), extraction, decision })
    }

    async fn resolve_conversation(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConversationId, StoreError> {
        if let Some(raw) = conversation_id {
            let id = ConversationId(raw.to_string());
            match self.store.find(&id).await? {
                Some(memory) if memory.is_active() && memory.user_id == user_id => return Ok(id),
                Some(memory) => {
                    info!(
                        event_name = "dialogue.conversation.restarted",
                        conversation_id = %memory.id,
                        state = memory.state.as_str(),
                        "conversation not resumable; starting a new one"
                    );
                }
                None => {}
            }
        }

        Ok(self.store.create(user_id).await?.id)
    }

    fn persistence_failure(
        &self,
        correlation_id: &str,
        conversation_id: &str,
        error: &StoreError,
    ) -> SubmitResponse {
        warn!(
            event_name = "dialogue.turn.persistence_failed",
            correlation_id,
            conversation_id,
            error_class = error.error_class(),
            error = %error,
            "conversation could not be loaded"
        );
        SubmitResponse {
            response: PERSISTENCE_FAILURE_RESPONSE.to_string(),
            conversation_id: conversation_id.to_string(),
            trace: None,
        }
    }
}

pub fn builtin_registry(outlets: Arc<dyn OutletDirectory>, config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new(Duration::from_millis(config.executor.tool_timeout_ms));
    registry.register(CalculatorTool);
    registry.register(OutletSearchTool::new(outlets));
    registry.register(RestaurantSearchTool);
    registry.register(ProductSearchTool);
    registry
}

fn known_values(
    slots: &BTreeMap<String, Value>,
    extraction: &Extraction,
) -> BTreeMap<String, Value> {
    let mut known = slots.clone();
    known.extend(extraction.entities.resolved());
    known
}

/// Slot writes and context changes a finished turn commits with it.
fn turn_effects(turn: &Turn, outcome: &ExecutionOutcome) -> TurnEffects {
    let mut effects = TurnEffects::implied_by(turn);
    let mut pending: Option<(IntentType, Vec<String>)> = None;

    if let Some(Action::RequestMissingInfo { intent, missing, .. }) = &outcome.answered_by {
        pending = Some((*intent, missing.clone()));
    }

    if let Some(output) = &outcome.tool_output {
        match output.tool {
            ToolKind::OutletSearch => {
                if let Ok(result) = OutletSearchResult::deserialize(&output.data) {
                    if let Some(outlet) = result.single() {
                        effects = effects.with_slot(SlotDelta::new(
                            LAST_OUTLET_SLOT,
                            outlet.key.0.clone(),
                            1.0,
                        ));
                    } else if result.is_ambiguous() {
                        pending = Some((IntentType::OutletInquiry, vec!["location".to_string()]));
                    }
                }
            }
            ToolKind::RestaurantSearch => {
                if let Ok(result) = RestaurantSearchResult::deserialize(&output.data) {
                    let names: Vec<_> = result.restaurants.iter().map(|r| r.name.clone()).collect();
                    effects = effects.with_slot(SlotDelta::new(
                        LAST_SEARCH_SLOT,
                        json!({"tool": output.tool.name(), "results": names}),
                        1.0,
                    ));
                }
            }
            ToolKind::ProductSearch => {
                if let Ok(result) = ProductSearchResult::deserialize(&output.data) {
                    let names: Vec<_> = result.products.iter().map(|p| p.name.clone()).collect();
                    effects = effects.with_slot(SlotDelta::new(
                        LAST_SEARCH_SLOT,
                        json!({"tool": output.tool.name(), "results": names}),
                        1.0,
                    ));
                }
            }
            ToolKind::Calculator => {}
        }
    }

    match pending {
        Some((intent, outstanding)) => effects
            .with_context(PENDING_INTENT_KEY, json!(intent.as_str()))
            .with_context(OUTSTANDING_SLOTS_KEY, json!(outstanding)),
        None => effects
            .with_context(PENDING_INTENT_KEY, Value::Null)
            .with_context(OUTSTANDING_SLOTS_KEY, Value::Null),
    }
}
