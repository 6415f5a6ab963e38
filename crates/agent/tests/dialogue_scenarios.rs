use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use parley_agent::tools::{CalculatorTool, OutletSearchTool};
use parley_agent::{DialogueRuntime, Tool, ToolFailure, ToolRegistry};
use parley_core::config::AppConfig;
use parley_core::domain::conversation::{
    ConversationId, ConversationMemory, ConversationState, Slot, Turn,
};
use parley_core::domain::decision::{ActionKind, ToolKind};
use parley_core::domain::entity::EXPRESSION;
use parley_core::domain::intent::IntentType;
use parley_core::domain::tool::{ToolErrorKind, ToolParams};
use parley_db::repositories::{
    ConversationRepository, InMemoryConversationRepository, InMemoryOutletDirectory,
    SqlOutletDirectory,
};
use parley_db::{connect_with_settings, fixtures, migrations, ConversationStore, RepositoryError};

type TestResult<T = ()> = Result<T, String>;

async fn sql_runtime() -> TestResult<DialogueRuntime> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| error.to_string())?;
    migrations::run_pending(&pool).await.map_err(|error| error.to_string())?;
    fixtures::seed_outlets(&pool).await.map_err(|error| error.to_string())?;

    let store = Arc::new(ConversationStore::sql(pool.clone()));
    let outlets = Arc::new(SqlOutletDirectory::new(pool));
    Ok(DialogueRuntime::with_builtin_tools(store, outlets, &AppConfig::default()))
}

async fn turn_count(runtime: &DialogueRuntime, id: &str) -> TestResult<usize> {
    let memory = runtime
        .store()
        .get(&ConversationId(id.to_string()))
        .await
        .map_err(|error| error.to_string())?;
    Ok(memory.turns.len())
}

struct SlowCalculator {
    delay: Duration,
}

#[async_trait]
impl Tool for SlowCalculator {
    fn kind(&self) -> ToolKind {
        ToolKind::Calculator
    }

    fn required_params(&self) -> &'static [&'static str] {
        &[EXPRESSION]
    }

    async fn execute(&self, _params: &ToolParams) -> Result<Value, ToolFailure> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({"expression": "0", "result": 0.0}))
    }
}

/// Delegates everything except turn writes, which always fail.
#[derive(Default)]
struct RejectingTurnRepository {
    inner: InMemoryConversationRepository,
}

#[async_trait]
impl ConversationRepository for RejectingTurnRepository {
    async fn insert(&self, memory: &ConversationMemory) -> Result<(), RepositoryError> {
        self.inner.insert(memory).await
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationMemory>, RepositoryError> {
        self.inner.find_by_id(id).await
    }

    async fn list_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationMemory>, RepositoryError> {
        self.inner.list_by_user(user_id).await
    }

    async fn record_turn(
        &self,
        _memory: &ConversationMemory,
        _turn: &Turn,
        _slots: &[Slot],
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Decode("disk full".to_string()))
    }

    async fn record_slot(
        &self,
        memory: &ConversationMemory,
        slot: &Slot,
    ) -> Result<(), RepositoryError> {
        self.inner.record_slot(memory, slot).await
    }

    async fn update_state(
        &self,
        id: &ConversationId,
        state: ConversationState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.inner.update_state(id, state, updated_at).await
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        self.inner.delete(id).await
    }

    async fn list_idle_since(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ConversationId>, RepositoryError> {
        self.inner.list_idle_since(older_than).await
    }
}

#[tokio::test]
async fn unrecognised_message_asks_for_clarification() -> TestResult {
    let runtime = sql_runtime().await?;

    let reply = runtime.submit_message("user-1", "blorp wibble", None).await;
    let trace = reply.trace.ok_or("trace missing")?;

    assert_eq!(trace.intent, IntentType::GeneralQuery);
    assert_eq!(trace.primary_action, ActionKind::AskClarification);
    assert!(reply.response.starts_with("I'm not sure I understood that."));
    assert!(trace.committed);
    assert_eq!(turn_count(&runtime, &reply.conversation_id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn bare_calculate_requests_the_expression_then_answers() -> TestResult {
    let runtime = sql_runtime().await?;

    let first = runtime.submit_message("user-1", "Calculate", None).await;
    let trace = first.trace.ok_or("trace missing")?;
    assert_eq!(trace.intent, IntentType::Calculation);
    assert_eq!(trace.primary_action, ActionKind::RequestMissingInfo);
    assert_eq!(first.response, "To help you better, could you please specify the calculation?");

    let second =
        runtime.submit_message("user-1", "25 + 15", Some(first.conversation_id.as_str())).await;
    assert_eq!(second.conversation_id, first.conversation_id);
    assert!(second.response.contains("40"), "{}", second.response);
    Ok(())
}

#[tokio::test]
async fn calculation_with_expression_calls_the_calculator() -> TestResult {
    let runtime = sql_runtime().await?;

    let reply = runtime.submit_message("user-1", "Calculate 25 + 15", None).await;
    let trace = reply.trace.ok_or("trace missing")?;

    assert_eq!(trace.primary_action, ActionKind::CallCalculator);
    assert!(!trace.fallback_used);
    assert!(reply.response.contains("40"), "{}", reply.response);
    Ok(())
}

#[tokio::test]
async fn outlet_follow_up_narrows_an_area_to_one_outlet() -> TestResult {
    let runtime = sql_runtime().await?;

    let first =
        runtime.submit_message("user-7", "Is there an outlet in Petaling Jaya?", None).await;
    assert!(first.response.starts_with("We have 2 outlets in Petaling Jaya"), "{}", first.response);

    let memory = runtime
        .store()
        .get(&ConversationId(first.conversation_id.clone()))
        .await
        .map_err(|error| error.to_string())?;
    assert_eq!(memory.context.get("pending_intent"), Some(&json!("OUTLET_INQUIRY")));
    assert_eq!(memory.context.get("outstanding_slots"), Some(&json!(["location"])));

    let second = runtime
        .submit_message(
            "user-7",
            "SS2, what's the opening time?",
            Some(first.conversation_id.as_str()),
        )
        .await;
    let trace = second.trace.ok_or("trace missing")?;

    assert_eq!(trace.intent, IntentType::OutletInquiry);
    assert!((trace.confidence - 0.8).abs() < f64::EPSILON);
    assert!(second.response.contains("9:00 AM"), "{}", second.response);

    let memory = runtime
        .store()
        .get(&ConversationId(first.conversation_id.clone()))
        .await
        .map_err(|error| error.to_string())?;
    assert_eq!(memory.turns.len(), 2);
    assert_eq!(memory.slot_value("location"), Some(&json!("ss2")));
    assert_eq!(memory.slot_value("last_outlet"), Some(&json!("ss2")));
    assert!(!memory.context.contains_key("pending_intent"));
    Ok(())
}

#[tokio::test]
async fn tool_timeout_falls_back_to_partial_information() -> TestResult {
    let store = Arc::new(ConversationStore::in_memory());
    let mut registry = ToolRegistry::new(Duration::from_millis(20));
    registry.register(SlowCalculator { delay: Duration::from_millis(500) });
    let runtime = DialogueRuntime::new(store, registry, &AppConfig::default());

    let reply = runtime.submit_message("user-3", "Calculate 2 * 3", None).await;
    let trace = reply.trace.ok_or("trace missing")?;

    assert!(trace.fallback_used);
    assert_eq!(trace.attempts[0].error_kind, Some(ToolErrorKind::Timeout));
    assert!(trace.error_classes.contains(&"tool_timeout"));
    assert!(reply.response.starts_with("I couldn't complete the calculation just now."));
    assert!(trace.committed);
    Ok(())
}

#[tokio::test]
async fn hostile_outlet_parameters_never_reach_the_directory() -> TestResult {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| error.to_string())?;
    migrations::run_pending(&pool).await.map_err(|error| error.to_string())?;
    fixtures::seed_outlets(&pool).await.map_err(|error| error.to_string())?;

    let mut registry = ToolRegistry::new(Duration::from_secs(1));
    registry.register(OutletSearchTool::new(Arc::new(SqlOutletDirectory::new(pool.clone()))));

    let params = ToolParams::new().with("location", "ss2'; DROP TABLE outlets; --");
    let result = registry.call("outlet_search", &params).await;

    assert!(!result.ok);
    assert_eq!(result.error_kind, Some(ToolErrorKind::UnsafeInput));

    let verified = fixtures::verify_outlets(&pool).await.map_err(|error| error.to_string())?;
    assert!(verified.all_present);
    assert_eq!(verified.checks.len(), 3);
    Ok(())
}

#[tokio::test]
async fn explain_is_repeatable_and_writes_nothing() -> TestResult {
    let runtime = sql_runtime().await?;
    let first =
        runtime.submit_message("user-9", "Is there an outlet in Petaling Jaya?", None).await;
    let id = first.conversation_id.as_str();

    let once = runtime
        .explain_decision("user-9", "SS2 opening hours", Some(id))
        .await
        .map_err(|error| error.to_string())?;
    let twice = runtime
        .explain_decision("user-9", "SS2 opening hours", Some(id))
        .await
        .map_err(|error| error.to_string())?;

    assert_eq!(once, twice);
    assert_eq!(once.decision.primary_kind(), ActionKind::SearchOutlets);
    assert_eq!(once.reasoning, once.decision.reasoning);
    assert_eq!(turn_count(&runtime, id).await?, 1);

    let fresh = runtime
        .explain_decision("user-9", "Calculate", None)
        .await
        .map_err(|error| error.to_string())?;
    assert_eq!(fresh.decision.primary_kind(), ActionKind::RequestMissingInfo);
    assert_eq!(
        runtime.store().list_by_user("user-9").await.map_err(|error| error.to_string())?.len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn failed_commit_apologises_and_leaves_state_untouched() -> TestResult {
    let store = Arc::new(ConversationStore::new(Arc::new(RejectingTurnRepository::default())));
    let runtime = DialogueRuntime::with_builtin_tools(
        store,
        Arc::new(InMemoryOutletDirectory::seeded()),
        &AppConfig::default(),
    );

    let reply = runtime.submit_message("user-5", "Calculate 1 + 1", None).await;
    let trace = reply.trace.ok_or("trace missing")?;

    assert_eq!(reply.response, parley_agent::responses::PERSISTENCE_FAILURE_RESPONSE);
    assert!(!trace.committed);
    assert!(trace.error_classes.contains(&"persistence_failure"));

    let memory = runtime
        .store()
        .get(&ConversationId(reply.conversation_id.clone()))
        .await
        .map_err(|error| error.to_string())?;
    assert!(memory.turns.is_empty());
    assert!(memory.slots.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_messages_to_one_conversation_are_both_stored() -> TestResult {
    let runtime = Arc::new(sql_runtime().await?);
    let first = runtime.submit_message("user-2", "hello", None).await;
    let id = first.conversation_id.clone();

    let (a, b) = tokio::join!(
        runtime.submit_message("user-2", "Calculate 2 + 2", Some(id.as_str())),
        runtime.submit_message("user-2", "Calculate 3 * 3", Some(id.as_str())),
    );

    assert_eq!(a.conversation_id, id);
    assert_eq!(b.conversation_id, id);

    let memory = runtime
        .store()
        .get(&ConversationId(id.clone()))
        .await
        .map_err(|error| error.to_string())?;
    assert_eq!(memory.turns.len(), 3);
    assert!(memory.turns.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    Ok(())
}

#[tokio::test]
async fn foreign_or_closed_conversation_starts_a_new_one() -> TestResult {
    let runtime = sql_runtime().await?;
    let owned = runtime.submit_message("alice", "hello", None).await;

    let intruder =
        runtime.submit_message("mallory", "hello", Some(owned.conversation_id.as_str())).await;
    assert_ne!(intruder.conversation_id, owned.conversation_id);

    let id = ConversationId(owned.conversation_id.clone());
    runtime
        .store()
        .set_state(&id, ConversationState::Completed)
        .await
        .map_err(|error| error.to_string())?;
    let resumed = runtime.submit_message("alice", "hello", Some(id.0.as_str())).await;
    assert_ne!(resumed.conversation_id, owned.conversation_id);
    assert_eq!(turn_count(&runtime, &owned.conversation_id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn builtin_registry_serves_every_tool() -> TestResult {
    let runtime = sql_runtime().await?;
    assert_eq!(runtime.registry().len(), ToolKind::ALL.len());

    let mut registry = ToolRegistry::new(Duration::from_secs(1));
    registry.register(CalculatorTool);
    assert!(registry.serves_intent(IntentType::Calculation));
    assert!(!registry.serves_intent(IntentType::OutletInquiry));
    Ok(())
}
