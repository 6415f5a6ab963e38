use std::env;
use std::sync::{Mutex, OnceLock};

use parley_cli::commands::{config, doctor, expire, explain, migrate};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied pending migrations; seeded 3 of 3 outlets");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("PARLEY_DATABASE_URL", "postgres://localhost/parley")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_passes_after_migrate_on_a_file_database() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("doctor.db").display());

    with_env(&[("PARLEY_DATABASE_URL", url.as_str())], || {
        let before: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(before["overall_status"], "fail");
        assert_eq!(check_status(&before, "migrations_applied"), "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");
        assert_eq!(after["overall_status"], "pass", "{after}");
        assert_eq!(check_status(&after, "outlet_directory"), "pass");
    });
}

#[test]
fn doctor_skips_database_checks_when_config_is_invalid() {
    with_env(&[("PARLEY_STORE_RETENTION_DAYS", "0")], || {
        let human = doctor::run(false);
        assert!(human.starts_with("doctor: one or more readiness checks failed"));
        assert!(human.contains("- [fail] config_validation"));
        assert!(human.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn config_attributes_env_overrides() {
    with_env(
        &[("PARLEY_DATABASE_URL", "sqlite::memory:"), ("PARLEY_LOG_LEVEL", "debug")],
        || {
            let output = config::run();

            assert!(output.contains(
                "- database.url = sqlite::memory: (source: env (PARLEY_DATABASE_URL))"
            ));
            assert!(output.contains("- logging.level = debug (source: env (PARLEY_LOG_LEVEL))"));
            assert!(output.contains("- executor.tool_timeout_ms = 2000 (source: default)"));
        },
    );
}

#[test]
fn explain_reports_the_planned_action() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let result = explain::run("operator", "Calculate", None);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["message"], "CALCULATION -> REQUEST_MISSING_INFO");
        let decision = &payload["details"]["decision"];
        assert_eq!(decision["primary_action"]["type"], "request_missing_info");
        assert_eq!(payload["details"]["extraction"]["rule"], "calculation");
    });
}

#[test]
fn expire_rejects_a_zero_window_and_counts_nothing_on_an_empty_store() {
    with_env(&[("PARLEY_DATABASE_URL", "sqlite::memory:")], || {
        let rejected = expire::run(Some(0));
        assert_eq!(rejected.exit_code, 2);
        assert_eq!(parse_payload(&rejected.output)["error_class"], "invalid_argument");

        let result = expire::run(None);
        assert_eq!(result.exit_code, 0);
        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("expired 0 conversation(s)"), "{message}");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
        .to_string()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PARLEY_DATABASE_URL",
        "PARLEY_DATABASE_MAX_CONNECTIONS",
        "PARLEY_DATABASE_TIMEOUT_SECS",
        "PARLEY_SERVER_BIND_ADDRESS",
        "PARLEY_SERVER_PORT",
        "PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "PARLEY_LOGGING_LEVEL",
        "PARLEY_LOGGING_FORMAT",
        "PARLEY_LOG_LEVEL",
        "PARLEY_LOG_FORMAT",
        "PARLEY_PLANNER_CLARIFICATION_THRESHOLD",
        "PARLEY_PLANNER_TOOL_COMPLETENESS_THRESHOLD",
        "PARLEY_PLANNER_TOOL_RELEVANCE_THRESHOLD",
        "PARLEY_PLANNER_URGENCY_THRESHOLD",
        "PARLEY_PLANNER_LOW_COMPLETENESS_THRESHOLD",
        "PARLEY_PLANNER_RETRY_TOOL_ON_FAILURE",
        "PARLEY_EXECUTOR_TOOL_TIMEOUT_MS",
        "PARLEY_STORE_RETENTION_DAYS",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
