pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{SeedResult, VerificationResult};
pub use repositories::{OutletDirectory, RepositoryError};
pub use store::{ConversationGuard, ConversationStore, StoreError};
