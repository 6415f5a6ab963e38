use std::sync::Arc;

use parley_agent::DialogueRuntime;
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use parley_db::repositories::SqlOutletDirectory;
use parley_db::{
    connect_with_config, fixtures, migrations, ConversationStore, DbPool, RepositoryError,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<DialogueRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("outlet seeding failed: {0}")]
    Seed(#[source] RepositoryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects, migrates and seeds the outlet directory, then wires the
/// dialogue runtime onto the same pool.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let seeded = fixtures::seed_outlets(&db_pool).await.map_err(BootstrapError::Seed)?;
    info!(
        event_name = "system.bootstrap.outlets_seeded",
        correlation_id = "bootstrap",
        outlets_inserted = seeded.outlets_inserted,
        outlets_expected = seeded.outlets_expected,
        "outlet directory ready"
    );

    let store = Arc::new(ConversationStore::sql(db_pool.clone()));
    let outlets = Arc::new(SqlOutletDirectory::new(db_pool.clone()));
    let runtime = Arc::new(DialogueRuntime::with_builtin_tools(store, outlets, &config));
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        tools = runtime.registry().len(),
        tool_timeout_ms = config.executor.tool_timeout_ms,
        "dialogue runtime ready"
    );

    Ok(Application { config, db_pool, runtime })
}

#[cfg(test)]
mod tests {
    use parley_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_non_sqlite_database_urls() {
        let result = bootstrap(options("postgres://localhost/parley")).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_outlets_and_runtime() {
        let app = bootstrap(options("sqlite::memory:")).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' \
             AND name IN ('conversations', 'conversation_turns', 'conversation_slots', 'outlets')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected dialogue tables after bootstrap");
        assert_eq!(table_count, 4);
        assert_eq!(app.runtime.registry().len(), 4);

        let reply =
            app.runtime.submit_message("smoke", "Where is the Mid Valley outlet?", None).await;
        assert!(reply.response.contains("Mid Valley"), "{}", reply.response);
        let trace = reply.trace.expect("trace");
        assert!(trace.committed);

        app.db_pool.close().await;
    }
}
