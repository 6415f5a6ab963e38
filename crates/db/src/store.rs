//! The conversation store: the only shared mutable state in the engine.
//!
//! Every mutation of one conversation runs under that conversation's async
//! mutex, so turns for the same id are applied strictly one after another
//! while different ids proceed in parallel. A caller that needs to read,
//! think and then write (a whole dialogue turn) takes the lock once with
//! [`ConversationStore::lock`] and passes the guard to the `*_locked`
//! methods.
//!
//! Writes are staged on a clone of the loaded memory and persisted in one
//! repository call; the stored state only changes if that call succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use parley_core::domain::conversation::{
    ConversationId, ConversationMemory, ConversationState, Slot, SlotDelta, Turn, TurnEffects,
};
use parley_core::errors::{ApplicationError, DomainError};

use crate::repositories::{
    ConversationRepository, InMemoryConversationRepository, RepositoryError,
    SqlConversationRepository,
};
use crate::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl StoreError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Domain(_) => "domain",
            Self::Repository(_) => "persistence",
        }
    }
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            RepositoryError::Domain(error) => Self::Domain(error),
            other => Self::Repository(other),
        }
    }
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(error) => Self::Domain(error),
            StoreError::NotFound(id) => {
                Self::Domain(DomainError::InvariantViolation(format!("unknown conversation `{id}`")))
            }
            StoreError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// Exclusive right to mutate one conversation. Released on drop.
pub struct ConversationGuard {
    id: ConversationId,
    _permit: OwnedMutexGuard<()>,
}

impl ConversationGuard {
    pub fn id(&self) -> &ConversationId {
        &self.id
    }
}

pub struct ConversationStore {
    repository: Arc<dyn ConversationRepository>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConversationStore {
    pub fn new(repository: Arc<dyn ConversationRepository>) -> Self {
        Self { repository, locks: Mutex::new(HashMap::new()) }
    }

    pub fn sql(pool: DbPool) -> Self {
        Self::new(Arc::new(SqlConversationRepository::new(pool)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryConversationRepository::default()))
    }

    /// Waits for exclusive access to `id`. The conversation does not need to
    /// exist yet.
    pub async fn lock(&self, id: &ConversationId) -> ConversationGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            locks.entry(id.0.clone()).or_default().clone()
        };

        ConversationGuard { id: id.clone(), _permit: mutex.lock_owned().await }
    }

    pub async fn create(&self, user_id: &str) -> Result<ConversationMemory, StoreError> {
        let memory = ConversationMemory::new(user_id);
        self.repository.insert(&memory).await?;

        info!(
            event_name = "store.conversation_created",
            conversation_id = %memory.id,
            user_id = %memory.user_id,
            "conversation created"
        );
        Ok(memory)
    }

    pub async fn find(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationMemory>, StoreError> {
        Ok(self.repository.find_by_id(id).await?)
    }

    pub async fn get(&self, id: &ConversationId) -> Result<ConversationMemory, StoreError> {
        self.find(id).await?.ok_or_else(|| StoreError::NotFound(id.0.clone()))
    }

    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<ConversationMemory>, StoreError> {
        Ok(self.repository.list_by_user(user_id).await?)
    }

    /// Appends `turn` together with the slot writes it implies.
    pub async fn append_turn(
        &self,
        id: &ConversationId,
        turn: Turn,
    ) -> Result<ConversationMemory, StoreError> {
        let effects = TurnEffects::implied_by(&turn);
        self.commit_turn(id, turn, effects).await
    }

    pub async fn commit_turn(
        &self,
        id: &ConversationId,
        turn: Turn,
        effects: TurnEffects,
    ) -> Result<ConversationMemory, StoreError> {
        let guard = self.lock(id).await;
        self.commit_turn_locked(&guard, turn, effects).await
    }

    pub async fn commit_turn_locked(
        &self,
        guard: &ConversationGuard,
        turn: Turn,
        effects: TurnEffects,
    ) -> Result<ConversationMemory, StoreError> {
        let mut memory = self.get(guard.id()).await?;
        let written = memory.apply_turn(turn, &effects, Utc::now())?;

        let Some(turn) = memory.latest_turn() else {
            return Err(DomainError::InvariantViolation("applied turn is missing".to_string()).into());
        };
        self.repository.record_turn(&memory, turn, &written).await?;

        info!(
            event_name = "store.turn_appended",
            conversation_id = %memory.id,
            intent = turn.intent.as_str(),
            turn_count = memory.turns.len(),
            slot_writes = written.len(),
            "turn committed"
        );
        Ok(memory)
    }

    pub async fn upsert_slot(
        &self,
        id: &ConversationId,
        name: &str,
        value: Value,
        confidence: f64,
    ) -> Result<Slot, StoreError> {
        let guard = self.lock(id).await;
        let mut memory = self.get(guard.id()).await?;

        let slot = memory.upsert_slot(&SlotDelta::new(name, value, confidence), Utc::now());
        self.repository.record_slot(&memory, &slot).await?;

        debug!(
            event_name = "store.slot_upserted",
            conversation_id = %memory.id,
            slot = %slot.name,
            confidence = slot.confidence,
            "slot upserted"
        );
        Ok(slot)
    }

    pub async fn set_state(
        &self,
        id: &ConversationId,
        state: ConversationState,
    ) -> Result<ConversationMemory, StoreError> {
        let guard = self.lock(id).await;
        self.set_state_locked(&guard, state).await
    }

    pub async fn set_state_locked(
        &self,
        guard: &ConversationGuard,
        state: ConversationState,
    ) -> Result<ConversationMemory, StoreError> {
        let mut memory = self.get(guard.id()).await?;
        let from = memory.state;
        memory.transition_to(state)?;
        self.repository.update_state(&memory.id, memory.state, memory.updated_at).await?;

        info!(
            event_name = "store.state_changed",
            conversation_id = %memory.id,
            from = from.as_str(),
            to = state.as_str(),
            "conversation state changed"
        );
        Ok(memory)
    }

    pub async fn delete(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let _guard = self.lock(id).await;
        let deleted = self.repository.delete(id).await?;
        if deleted {
            info!(event_name = "store.conversation_deleted", conversation_id = %id, "conversation deleted");
        }
        Ok(deleted)
    }

    /// Deletes every conversation idle since before `older_than`. A
    /// conversation that receives a turn while the sweep runs is kept.
    pub async fn expire(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let candidates = self.repository.list_idle_since(older_than).await?;
        let mut expired = 0;

        for id in candidates {
            let _guard = self.lock(&id).await;
            let still_idle = self
                .repository
                .find_by_id(&id)
                .await?
                .is_some_and(|memory| memory.updated_at < older_than);
            if still_idle && self.repository.delete(&id).await? {
                expired += 1;
            }
        }

        info!(
            event_name = "store.expired",
            older_than = %older_than.to_rfc3339(),
            expired,
            "idle conversations expired"
        );
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use parley_core::domain::conversation::{
        ConversationId, ConversationState, SlotDelta, Turn, TurnEffects,
    };
    use parley_core::domain::entity::{Entities, Entity};
    use parley_core::domain::intent::IntentType;

    use super::{ConversationStore, StoreError};
    use crate::{connect_with_settings, migrations};

    async fn sql_store() -> ConversationStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        ConversationStore::sql(pool)
    }

    fn calculation_turn(expression: &str) -> Turn {
        let entities: Entities = [Entity::Expression(expression.to_string())].into_iter().collect();
        Turn::new(format!("calculate {expression}"), "done", IntentType::Calculation, entities, 0.9)
    }

    #[tokio::test]
    async fn append_turn_commits_implied_slots() {
        let store = sql_store().await;
        let memory = store.create("user-1").await.expect("create");

        let updated = store.append_turn(&memory.id, calculation_turn("2 + 2")).await.expect("append");
        assert_eq!(updated.turns.len(), 1);
        assert_eq!(updated.slot_value("expression"), Some(&json!("2 + 2")));

        let reloaded = store.get(&memory.id).await.expect("get");
        assert_eq!(reloaded.turns, updated.turns);
        assert_eq!(reloaded.slot_value("expression"), Some(&json!("2 + 2")));
    }

    #[tokio::test]
    async fn slot_reads_return_the_latest_upsert() {
        let store = sql_store().await;
        let memory = store.create("user-1").await.expect("create");

        store.upsert_slot(&memory.id, "cuisine", json!("Thai"), 0.9).await.expect("first");
        store.upsert_slot(&memory.id, "cuisine", json!("Indian"), 0.3).await.expect("second");

        let reloaded = store.get(&memory.id).await.expect("get");
        let slot = reloaded.slots.get("cuisine").expect("slot");
        assert_eq!(slot.value, json!("Indian"));
        assert!((slot.confidence - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_conversation_are_not_lost() {
        let store = Arc::new(sql_store().await);
        let memory = store.create("user-1").await.expect("create");

        let mut handles = Vec::new();
        for index in 0..16 {
            let store = Arc::clone(&store);
            let id = memory.id.clone();
            handles.push(tokio::spawn(async move {
                let guard = store.lock(&id).await;
                let current = store.get(&id).await.expect("get");
                let count = current.slot_value("count").and_then(|value| value.as_i64()).unwrap_or(0);
                tokio::task::yield_now().await;
                let effects =
                    TurnEffects::default().with_slot(SlotDelta::new("count", count + 1, 1.0));
                store
                    .commit_turn_locked(&guard, calculation_turn(&format!("{index} + 1")), effects)
                    .await
                    .expect("commit");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        let reloaded = store.get(&memory.id).await.expect("get");
        assert_eq!(reloaded.turns.len(), 16);
        assert_eq!(reloaded.slot_value("count"), Some(&json!(16)));
        assert!(reloaded.turns.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[tokio::test]
    async fn closed_conversation_rejects_turns_and_keeps_state() {
        let store = ConversationStore::in_memory();
        let memory = store.create("user-1").await.expect("create");
        store.set_state(&memory.id, ConversationState::Completed).await.expect("complete");

        let result = store.append_turn(&memory.id, calculation_turn("1 + 1")).await;
        assert!(matches!(result, Err(StoreError::Domain(_))));
        assert!(store.get(&memory.id).await.expect("get").turns.is_empty());

        let reopen = store.set_state(&memory.id, ConversationState::Active).await;
        assert!(matches!(reopen, Err(StoreError::Domain(_))));
    }

    #[tokio::test]
    async fn missing_conversation_is_not_found() {
        let store = ConversationStore::in_memory();
        let missing = ConversationId("does-not-exist".to_string());

        let result = store.append_turn(&missing, calculation_turn("1 + 1")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(!store.delete(&missing).await.expect("delete"));
    }

    #[tokio::test]
    async fn expire_removes_only_idle_conversations() {
        let store = sql_store().await;
        let idle = store.create("user-1").await.expect("create idle");
        let active = store.create("user-1").await.expect("create active");

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append_turn(&active.id, calculation_turn("3 * 3")).await.expect("append");

        let expired = store.expire(cutoff).await.expect("expire");
        assert_eq!(expired, 1);
        assert!(store.find(&idle.id).await.expect("find").is_none());
        assert!(store.find(&active.id).await.expect("find").is_some());

        let everything = store.expire(Utc::now() + Duration::days(1)).await.expect("expire all");
        assert_eq!(everything, 1);
        assert!(store.list_by_user("user-1").await.expect("list").is_empty());
    }
}
