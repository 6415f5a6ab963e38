use chrono::{Duration, Utc};
use parley_db::{connect_with_config, migrations, ConversationStore};

use crate::commands::{prepare, CommandResult};

/// Deletes conversations idle for longer than `older_than_days`, defaulting
/// to `store.retention_days`.
pub fn run(older_than_days: Option<u32>) -> CommandResult {
    let (config, runtime) = match prepare("expire") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let days = older_than_days.unwrap_or(config.store.retention_days);
    if days == 0 {
        return CommandResult::failure(
            "expire",
            "invalid_argument",
            "--older-than-days must be greater than zero",
            2,
        );
    }
    let cutoff = Utc::now() - Duration::days(i64::from(days));

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let expired = ConversationStore::sql(pool.clone())
            .expire(cutoff)
            .await
            .map_err(|error| (error.error_class(), error.to_string(), 7u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(expired)
    });

    match result {
        Ok(expired) => CommandResult::success(
            "expire",
            format!("expired {expired} conversation(s) idle since before {}", cutoff.to_rfc3339()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire", error_class, message, exit_code)
        }
    }
}
