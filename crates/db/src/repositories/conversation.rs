use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use parley_core::domain::conversation::{
    ConversationId, ConversationMemory, ConversationState, Slot, Turn, TurnId,
};
use parley_core::domain::entity::Entities;
use parley_core::domain::intent::IntentType;

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_turns(&self, id: &ConversationId) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                turn_id,
                user_message,
                bot_response,
                intent,
                entities_blob,
                timestamp,
                confidence
             FROM conversation_turns
             WHERE conversation_id = ?
             ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }

    async fn load_slots(
        &self,
        id: &ConversationId,
    ) -> Result<BTreeMap<String, Slot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT slot_name, slot_value, confidence, last_updated
             FROM conversation_slots
             WHERE conversation_id = ?",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| slot_from_row(row).map(|slot| (slot.name.clone(), slot)))
            .collect()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn insert(&self, memory: &ConversationMemory) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversations (
                conversation_id,
                user_id,
                state,
                created_at,
                updated_at,
                context_blob
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&memory.id.0)
        .bind(&memory.user_id)
        .bind(memory.state.as_str())
        .bind(format_timestamp(&memory.created_at))
        .bind(format_timestamp(&memory.updated_at))
        .bind(encode_json("context_blob", &memory.context)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationMemory>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                conversation_id,
                user_id,
                state,
                created_at,
                updated_at,
                context_blob
             FROM conversations
             WHERE conversation_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(mut memory) = row.map(header_from_row).transpose()? else {
            return Ok(None);
        };

        memory.turns = self.load_turns(id).await?;
        memory.slots = self.load_slots(id).await?;
        Ok(Some(memory))
    }

    async fn list_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationMemory>, RepositoryError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT conversation_id
             FROM conversations
             WHERE user_id = ?
             ORDER BY updated_at DESC, conversation_id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(ids.len());
        for id in ids {
            // A row deleted between the two reads is simply skipped.
            if let Some(memory) = self.find_by_id(&ConversationId(id)).await? {
                conversations.push(memory);
            }
        }
        Ok(conversations)
    }

    async fn record_turn(
        &self,
        memory: &ConversationMemory,
        turn: &Turn,
        slots: &[Slot],
    ) -> Result<(), RepositoryError> {
        let entities_blob = encode_json("entities_blob", &turn.entities.to_flat())?;
        let context_blob = encode_json("context_blob", &memory.context)?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE conversations
             SET updated_at = ?, context_blob = ?
             WHERE conversation_id = ? AND state = 'active'",
        )
        .bind(format_timestamp(&memory.updated_at))
        .bind(&context_blob)
        .bind(&memory.id.0)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound(memory.id.0.clone()));
        }

        sqlx::query(
            "INSERT INTO conversation_turns (
                turn_id,
                conversation_id,
                user_message,
                bot_response,
                intent,
                entities_blob,
                timestamp,
                confidence
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id.0)
        .bind(&memory.id.0)
        .bind(&turn.user_message)
        .bind(&turn.bot_response)
        .bind(turn.intent.as_str())
        .bind(&entities_blob)
        .bind(format_timestamp(&turn.timestamp))
        .bind(turn.confidence)
        .execute(&mut *tx)
        .await?;

        for slot in slots {
            sqlx::query(UPSERT_SLOT)
                .bind(&memory.id.0)
                .bind(&slot.name)
                .bind(encode_json("slot_value", &slot.value)?)
                .bind(slot.confidence)
                .bind(format_timestamp(&slot.last_updated))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_slot(
        &self,
        memory: &ConversationMemory,
        slot: &Slot,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_SLOT)
            .bind(&memory.id.0)
            .bind(&slot.name)
            .bind(encode_json("slot_value", &slot.value)?)
            .bind(slot.confidence)
            .bind(format_timestamp(&slot.last_updated))
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE conversation_id = ?")
            .bind(format_timestamp(&memory.updated_at))
            .bind(&memory.id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_state(
        &self,
        id: &ConversationId,
        state: ConversationState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET state = ?, updated_at = ? WHERE conversation_id = ?",
        )
        .bind(state.as_str())
        .bind(format_timestamp(&updated_at))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.0.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM conversations WHERE conversation_id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_idle_since(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ConversationId>, RepositoryError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT conversation_id
             FROM conversations
             WHERE updated_at < ?
             ORDER BY updated_at ASC",
        )
        .bind(format_timestamp(&older_than))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(ConversationId).collect())
    }
}

const UPSERT_SLOT: &str = "INSERT INTO conversation_slots (
        conversation_id,
        slot_name,
        slot_value,
        confidence,
        last_updated
     ) VALUES (?, ?, ?, ?, ?)
     ON CONFLICT(conversation_id, slot_name) DO UPDATE SET
        slot_value = excluded.slot_value,
        confidence = excluded.confidence,
        last_updated = excluded.last_updated";

/// Fixed-width UTC so that text ordering in SQLite matches time ordering.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn header_from_row(row: SqliteRow) -> Result<ConversationMemory, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = ConversationState::parse(&state_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation state `{state_raw}`"))
    })?;

    Ok(ConversationMemory {
        id: ConversationId(row.try_get("conversation_id")?),
        user_id: row.try_get("user_id")?,
        state,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        context: decode_json("context_blob", &row.try_get::<String, _>("context_blob")?)?,
        turns: Vec::new(),
        slots: BTreeMap::new(),
    })
}

fn turn_from_row(row: SqliteRow) -> Result<Turn, RepositoryError> {
    let intent_raw = row.try_get::<String, _>("intent")?;
    let intent = IntentType::parse(&intent_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown intent `{intent_raw}`")))?;

    let flat: BTreeMap<String, Value> =
        decode_json("entities_blob", &row.try_get::<String, _>("entities_blob")?)?;
    let entities = Entities::from_flat(&flat)
        .map_err(|error| RepositoryError::Decode(format!("entities_blob: {error}")))?;

    Ok(Turn {
        id: TurnId(row.try_get("turn_id")?),
        user_message: row.try_get("user_message")?,
        bot_response: row.try_get("bot_response")?,
        intent,
        entities,
        timestamp: parse_timestamp("timestamp", row.try_get("timestamp")?)?,
        confidence: row.try_get("confidence")?,
    })
}

fn slot_from_row(row: SqliteRow) -> Result<Slot, RepositoryError> {
    Ok(Slot {
        name: row.try_get("slot_name")?,
        value: decode_json("slot_value", &row.try_get::<String, _>("slot_value")?)?,
        confidence: row.try_get("confidence")?,
        last_updated: parse_timestamp("last_updated", row.try_get("last_updated")?)?,
    })
}

fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use parley_core::domain::conversation::{
        ConversationMemory, ConversationState, SlotDelta, Turn, TurnEffects,
    };
    use parley_core::domain::entity::{Entities, Entity, QueryType};
    use parley_core::domain::intent::IntentType;

    use super::SqlConversationRepository;
    use crate::repositories::{ConversationRepository, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn outlet_turn() -> Turn {
        let entities: Entities = [
            Entity::Location("ss2".to_string()),
            Entity::Location("mid_valley".to_string()),
            Entity::QueryType(QueryType::OpeningHours),
        ]
        .into_iter()
        .collect();
        Turn::new("hours at ss2 or mid valley?", "Which one?", IntentType::OutletInquiry, entities, 0.9)
    }

    #[tokio::test]
    async fn recorded_turn_round_trips_with_slots_and_context() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let mut memory = ConversationMemory::new("user-1");
        repo.insert(&memory).await.expect("insert");

        let turn = outlet_turn();
        let effects = TurnEffects::implied_by(&turn)
            .with_slot(SlotDelta::new("last_outlet", "ss2", 1.0))
            .with_context("pending_intent", json!("OUTLET_INQUIRY"));
        let written = memory.apply_turn(turn.clone(), &effects, Utc::now()).expect("apply");
        repo.record_turn(&memory, &memory.turns[0], &written).await.expect("record turn");

        let loaded = repo.find_by_id(&memory.id).await.expect("find").expect("present");
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].entities, turn.entities);
        assert_eq!(loaded.slot_value("query_type"), Some(&json!("opening_hours")));
        assert_eq!(loaded.slot_value("last_outlet"), Some(&json!("ss2")));
        assert_eq!(loaded.slot_value("location"), None, "ambiguous location is not a slot");
        assert_eq!(loaded.context.get("pending_intent"), Some(&json!("OUTLET_INQUIRY")));
        assert_eq!(loaded.state, ConversationState::Active);
    }

    #[tokio::test]
    async fn turn_on_closed_conversation_is_not_written() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let mut memory = ConversationMemory::new("user-1");
        repo.insert(&memory).await.expect("insert");
        repo.update_state(&memory.id, ConversationState::Completed, Utc::now())
            .await
            .expect("close");

        let turn = outlet_turn();
        let written =
            memory.apply_turn(turn, &TurnEffects::default(), Utc::now()).expect("apply in memory");
        let result = repo.record_turn(&memory, &memory.turns[0], &written).await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));

        let loaded = repo.find_by_id(&memory.id).await.expect("find").expect("present");
        assert!(loaded.turns.is_empty());
    }

    #[tokio::test]
    async fn idle_listing_and_delete_cascade() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());

        let mut stale = ConversationMemory::new("user-1");
        stale.updated_at = Utc::now() - Duration::days(40);
        repo.insert(&stale).await.expect("insert stale");
        let fresh = ConversationMemory::new("user-1");
        repo.insert(&fresh).await.expect("insert fresh");

        let mut stale_with_turn = repo.find_by_id(&stale.id).await.expect("find").expect("present");
        let mut old_turn = outlet_turn();
        old_turn.timestamp = stale.updated_at;
        let written = stale_with_turn
            .apply_turn(old_turn, &TurnEffects::default(), stale.updated_at)
            .expect("apply");
        repo.record_turn(&stale_with_turn, &stale_with_turn.turns[0], &written)
            .await
            .expect("record");

        let idle = repo.list_idle_since(Utc::now() - Duration::days(30)).await.expect("idle");
        assert_eq!(idle, vec![stale.id.clone()]);

        assert!(repo.delete(&stale.id).await.expect("delete"));
        assert!(!repo.delete(&stale.id).await.expect("second delete"));

        let orphan_turns: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversation_turns WHERE conversation_id = ?")
                .bind(&stale.id.0)
                .fetch_one(&pool)
                .await
                .expect("count turns");
        assert_eq!(orphan_turns, 0);

        let listed = repo.list_by_user("user-1").await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, fresh.id);
    }
}
