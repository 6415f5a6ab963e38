use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use parley_core::domain::conversation::{
    ConversationId, ConversationMemory, ConversationState, Slot, Turn,
};
use parley_core::domain::outlet::Outlet;

use super::{ConversationRepository, OutletDirectory, RepositoryError};
use crate::fixtures;

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, ConversationMemory>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn insert(&self, memory: &ConversationMemory) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(memory.id.0.clone(), memory.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationMemory>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id.0).cloned())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationMemory>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut listed: Vec<ConversationMemory> = conversations
            .values()
            .filter(|memory| memory.user_id == user_id)
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            right.updated_at.cmp(&left.updated_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn record_turn(
        &self,
        memory: &ConversationMemory,
        turn: &Turn,
        slots: &[Slot],
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let stored = conversations
            .get_mut(&memory.id.0)
            .filter(|stored| stored.is_active())
            .ok_or_else(|| RepositoryError::NotFound(memory.id.0.clone()))?;

        stored.turns.push(turn.clone());
        for slot in slots {
            stored.slots.insert(slot.name.clone(), slot.clone());
        }
        stored.context = memory.context.clone();
        stored.updated_at = memory.updated_at;
        Ok(())
    }

    async fn record_slot(
        &self,
        memory: &ConversationMemory,
        slot: &Slot,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let stored = conversations
            .get_mut(&memory.id.0)
            .ok_or_else(|| RepositoryError::NotFound(memory.id.0.clone()))?;

        stored.slots.insert(slot.name.clone(), slot.clone());
        stored.updated_at = memory.updated_at;
        Ok(())
    }

    async fn update_state(
        &self,
        id: &ConversationId,
        state: ConversationState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let stored =
            conversations.get_mut(&id.0).ok_or_else(|| RepositoryError::NotFound(id.0.clone()))?;
        stored.state = state;
        stored.updated_at = updated_at;
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        Ok(conversations.remove(&id.0).is_some())
    }

    async fn list_idle_since(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ConversationId>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut idle: Vec<&ConversationMemory> =
            conversations.values().filter(|memory| memory.updated_at < older_than).collect();
        idle.sort_by_key(|memory| memory.updated_at);
        Ok(idle.into_iter().map(|memory| memory.id.clone()).collect())
    }
}

pub struct InMemoryOutletDirectory {
    outlets: Vec<Outlet>,
}

impl InMemoryOutletDirectory {
    pub fn new(outlets: Vec<Outlet>) -> Self {
        Self { outlets }
    }

    /// Directory holding the same outlets the SQL fixtures seed.
    pub fn seeded() -> Self {
        Self::new(fixtures::default_outlets())
    }
}

#[async_trait::async_trait]
impl OutletDirectory for InMemoryOutletDirectory {
    async fn find_by_location(&self, location_key: &str) -> Result<Vec<Outlet>, RepositoryError> {
        Ok(self
            .outlets
            .iter()
            .filter(|outlet| outlet.key.0 == location_key || outlet.area_key == location_key)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Outlet>, RepositoryError> {
        Ok(self.outlets.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use parley_core::domain::conversation::{ConversationMemory, ConversationState};

    use super::{InMemoryConversationRepository, InMemoryOutletDirectory};
    use crate::repositories::{ConversationRepository, OutletDirectory};

    #[tokio::test]
    async fn in_memory_conversation_repo_lists_newest_first() {
        let repo = InMemoryConversationRepository::default();

        let mut older = ConversationMemory::new("user-7");
        older.updated_at = Utc::now() - Duration::hours(2);
        let newer = ConversationMemory::new("user-7");
        let other = ConversationMemory::new("user-8");
        for memory in [&older, &newer, &other] {
            repo.insert(memory).await.expect("insert");
        }

        let listed = repo.list_by_user("user-7").await.expect("list");
        let ids: Vec<_> = listed.iter().map(|memory| memory.id.clone()).collect();
        assert_eq!(ids, vec![newer.id.clone(), older.id.clone()]);

        let idle = repo.list_idle_since(Utc::now() - Duration::hours(1)).await.expect("idle");
        assert_eq!(idle, vec![older.id.clone()]);

        repo.update_state(&newer.id, ConversationState::Abandoned, Utc::now())
            .await
            .expect("abandon");
        let reloaded = repo.find_by_id(&newer.id).await.expect("find").expect("present");
        assert_eq!(reloaded.state, ConversationState::Abandoned);
    }

    #[tokio::test]
    async fn in_memory_outlets_resolve_areas() {
        let directory = InMemoryOutletDirectory::seeded();

        let petaling_jaya =
            directory.find_by_location("petaling_jaya").await.expect("area lookup");
        let mut keys: Vec<_> = petaling_jaya.iter().map(|outlet| outlet.key.0.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["one_utama", "ss2"]);

        let ss2 = directory.find_by_location("ss2").await.expect("outlet lookup");
        assert_eq!(ss2.len(), 1);
        assert_eq!(ss2[0].name, "SS2 Outlet");
    }
}
