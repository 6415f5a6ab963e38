use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::entity::Entities;
use crate::domain::intent::IntentType;
use crate::errors::DomainError;

/// Context key holding the intent still waiting on a critical slot.
pub const PENDING_INTENT_KEY: &str = "pending_intent";
/// Context key holding the slots the pending intent still needs.
pub const OUTSTANDING_SLOTS_KEY: &str = "outstanding_slots";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Active,
    Completed,
    Abandoned,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: ConversationState) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Completed) | (Self::Active, Self::Abandoned)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub value: Value,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotDelta {
    pub name: String,
    pub value: Value,
    pub confidence: f64,
}

impl SlotDelta {
    pub fn new(name: impl Into<String>, value: impl Into<Value>, confidence: f64) -> Self {
        Self { name: name.into(), value: value.into(), confidence: confidence.clamp(0.0, 1.0) }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub user_message: String,
    pub bot_response: String,
    pub intent: IntentType,
    pub entities: Entities,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

impl Turn {
    pub fn new(
        user_message: impl Into<String>,
        bot_response: impl Into<String>,
        intent: IntentType,
        entities: Entities,
        confidence: f64,
    ) -> Self {
        Self {
            id: TurnId::generate(),
            user_message: user_message.into(),
            bot_response: bot_response.into(),
            intent,
            entities,
            timestamp: Utc::now(),
            confidence,
        }
    }

    /// Slot writes a turn implies on its own: every unambiguous entity,
    /// at the turn's confidence.
    pub fn implied_slot_deltas(&self) -> Vec<SlotDelta> {
        self.entities
            .resolved()
            .into_iter()
            .map(|(name, value)| SlotDelta::new(name, value, self.confidence))
            .collect()
    }
}

/// Everything a committed turn changes besides the turn row itself.
///
/// A `Value::Null` context entry removes the key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnEffects {
    pub slots: Vec<SlotDelta>,
    pub context: BTreeMap<String, Value>,
}

impl TurnEffects {
    pub fn implied_by(turn: &Turn) -> Self {
        Self { slots: turn.implied_slot_deltas(), context: BTreeMap::new() }
    }

    pub fn with_slot(mut self, delta: SlotDelta) -> Self {
        self.slots.push(delta);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// What the extractor is allowed to know about the conversation so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorTurnSummary {
    pub intent: Option<IntentType>,
    pub pending_intent: Option<IntentType>,
    pub outstanding_slots: Vec<String>,
    pub resolved_slots: BTreeSet<String>,
}

impl PriorTurnSummary {
    /// The intent a follow-up may carry forward: set only when the prior turn
    /// asked for something and that thing is still missing.
    pub fn carryover_intent(&self) -> Option<IntentType> {
        match (self.intent, self.pending_intent) {
            (Some(prior), Some(pending))
                if prior == pending && !self.outstanding_slots.is_empty() =>
            {
                Some(pending)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub id: ConversationId,
    pub user_id: String,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub context: BTreeMap<String, Value>,
    pub turns: Vec<Turn>,
    pub slots: BTreeMap<String, Slot>,
}

impl ConversationMemory {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::with_id(ConversationId::generate(), user_id)
    }

    pub fn with_id(id: ConversationId, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            state: ConversationState::Active,
            created_at: now,
            updated_at: now,
            context: BTreeMap::new(),
            turns: Vec::new(),
            slots: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ConversationState::Active
    }

    pub fn latest_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn slot_value(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).map(|slot| &slot.value)
    }

    /// Current slot values as a flat map, the planner's view of state.
    pub fn slot_values(&self) -> BTreeMap<String, Value> {
        self.slots.iter().map(|(name, slot)| (name.clone(), slot.value.clone())).collect()
    }

    pub fn prior_turn_summary(&self) -> PriorTurnSummary {
        let pending_intent = self
            .context
            .get(PENDING_INTENT_KEY)
            .and_then(Value::as_str)
            .and_then(IntentType::parse);
        let outstanding_slots = self
            .context
            .get(OUTSTANDING_SLOTS_KEY)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        PriorTurnSummary {
            intent: self.latest_turn().map(|turn| turn.intent),
            pending_intent,
            outstanding_slots,
            resolved_slots: self.slots.keys().cloned().collect(),
        }
    }

    /// Applies a turn and its effects in memory. Returns the slots that were
    /// written so the caller can persist exactly those rows.
    ///
    /// The turn's timestamp is raised to the previous turn's when the clock
    /// went backwards, keeping the history non-decreasing.
    pub fn apply_turn(
        &mut self,
        mut turn: Turn,
        effects: &TurnEffects,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, DomainError> {
        if !self.is_active() {
            return Err(DomainError::ConversationClosed {
                conversation_id: self.id.0.clone(),
                state: self.state,
            });
        }

        if let Some(previous) = self.latest_turn() {
            if turn.timestamp < previous.timestamp {
                turn.timestamp = previous.timestamp;
            }
        }
        let committed_at = now.max(turn.timestamp);

        let mut written = Vec::with_capacity(effects.slots.len());
        for delta in &effects.slots {
            written.push(self.write_slot(delta, committed_at));
        }

        for (key, value) in &effects.context {
            if value.is_null() {
                self.context.remove(key);
            } else {
                self.context.insert(key.clone(), value.clone());
            }
        }

        self.turns.push(turn);
        self.updated_at = self.updated_at.max(committed_at);
        Ok(written)
    }

    pub fn upsert_slot(&mut self, delta: &SlotDelta, now: DateTime<Utc>) -> Slot {
        let slot = self.write_slot(delta, now);
        self.updated_at = self.updated_at.max(now);
        slot
    }

    pub fn transition_to(&mut self, next: ConversationState) -> Result<(), DomainError> {
        if self.state.can_transition_to(next) {
            self.state = next;
            self.updated_at = self.updated_at.max(Utc::now());
            return Ok(());
        }

        Err(DomainError::InvalidStateTransition { from: self.state, to: next })
    }

    fn write_slot(&mut self, delta: &SlotDelta, now: DateTime<Utc>) -> Slot {
        let slot = Slot {
            name: delta.name.clone(),
            value: delta.value.clone(),
            confidence: delta.confidence,
            last_updated: now,
        };
        self.slots.insert(slot.name.clone(), slot.clone());
        slot
    }
}
