use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use parley_core::domain::conversation::{
    ConversationId, ConversationMemory, ConversationState, Slot, Turn,
};
use parley_core::domain::outlet::Outlet;
use parley_core::errors::DomainError;

pub mod conversation;
pub mod memory;
pub mod outlet;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryOutletDirectory};
pub use outlet::SqlOutletDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conversation `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Durable conversation rows. Callers own the in-memory state; each write
/// method persists one already-applied change and must be all-or-nothing.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn insert(&self, memory: &ConversationMemory) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationMemory>, RepositoryError>;

    /// Most recently updated first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ConversationMemory>, RepositoryError>;

    /// Writes `turn`, the `slots` it produced and the conversation header
    /// (`updated_at`, context) of `memory` in a single transaction.
    async fn record_turn(
        &self,
        memory: &ConversationMemory,
        turn: &Turn,
        slots: &[Slot],
    ) -> Result<(), RepositoryError>;

    async fn record_slot(
        &self,
        memory: &ConversationMemory,
        slot: &Slot,
    ) -> Result<(), RepositoryError>;

    async fn update_state(
        &self,
        id: &ConversationId,
        state: ConversationState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Returns `false` when nothing was deleted.
    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError>;

    async fn list_idle_since(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ConversationId>, RepositoryError>;
}

/// Lookup behind the outlet search tool.
#[async_trait]
pub trait OutletDirectory: Send + Sync {
    /// Outlets whose key or area key equals `location_key`.
    async fn find_by_location(&self, location_key: &str) -> Result<Vec<Outlet>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Outlet>, RepositoryError>;
}
