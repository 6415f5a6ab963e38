use std::sync::Arc;

use parley_agent::DialogueRuntime;
use parley_db::repositories::SqlOutletDirectory;
use parley_db::{connect_with_config, migrations, ConversationStore};

use crate::commands::{prepare, CommandResult};

/// Prints the plan the runtime would follow for `message` without running
/// tools or recording a turn.
pub fn run(user_id: &str, message: &str, conversation_id: Option<&str>) -> CommandResult {
    let (config, runtime) = match prepare("explain") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let dialogue = DialogueRuntime::with_builtin_tools(
            Arc::new(ConversationStore::sql(pool.clone())),
            Arc::new(SqlOutletDirectory::new(pool.clone())),
            &config,
        );
        let explained = dialogue
            .explain_decision(user_id, message, conversation_id)
            .await
            .map_err(|error| (error.error_class(), error.to_string(), 7u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(explained)
    });

    match result {
        Ok(explained) => match serde_json::to_value(&explained) {
            Ok(details) => CommandResult::success_with_details(
                "explain",
                format!(
                    "{} -> {}",
                    explained.extraction.intent,
                    explained.decision.primary_kind().as_str()
                ),
                Some(details),
            ),
            Err(error) => CommandResult::failure("explain", "serialization", error.to_string(), 8),
        },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("explain", error_class, message, exit_code)
        }
    }
}
