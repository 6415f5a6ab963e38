use std::env;
use std::fs;
use std::path::Path;

use parley_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    /// Environment variables checked in order; the first one set wins.
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let planner = &config.planner;
    vec![
        Field {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["PARLEY_DATABASE_URL"],
        },
        Field {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["PARLEY_DATABASE_MAX_CONNECTIONS"],
        },
        Field {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["PARLEY_DATABASE_TIMEOUT_SECS"],
        },
        Field {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["PARLEY_SERVER_BIND_ADDRESS"],
        },
        Field {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["PARLEY_SERVER_PORT"],
        },
        Field {
            key: "server.graceful_shutdown_secs",
            value: config.server.graceful_shutdown_secs.to_string(),
            env_keys: &["PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
        },
        Field {
            key: "planner.clarification_threshold",
            value: planner.clarification_threshold.to_string(),
            env_keys: &["PARLEY_PLANNER_CLARIFICATION_THRESHOLD"],
        },
        Field {
            key: "planner.tool_completeness_threshold",
            value: planner.tool_completeness_threshold.to_string(),
            env_keys: &["PARLEY_PLANNER_TOOL_COMPLETENESS_THRESHOLD"],
        },
        Field {
            key: "planner.tool_relevance_threshold",
            value: planner.tool_relevance_threshold.to_string(),
            env_keys: &["PARLEY_PLANNER_TOOL_RELEVANCE_THRESHOLD"],
        },
        Field {
            key: "planner.urgency_threshold",
            value: planner.urgency_threshold.to_string(),
            env_keys: &["PARLEY_PLANNER_URGENCY_THRESHOLD"],
        },
        Field {
            key: "planner.low_completeness_threshold",
            value: planner.low_completeness_threshold.to_string(),
            env_keys: &["PARLEY_PLANNER_LOW_COMPLETENESS_THRESHOLD"],
        },
        Field {
            key: "planner.optional_slot_weight",
            value: planner.optional_slot_weight.to_string(),
            env_keys: &[],
        },
        Field {
            key: "planner.retry_tool_on_failure",
            value: planner.retry_tool_on_failure.to_string(),
            env_keys: &["PARLEY_PLANNER_RETRY_TOOL_ON_FAILURE"],
        },
        Field {
            key: "extractor.carryover_confidence",
            value: config.extractor.carryover_confidence.to_string(),
            env_keys: &[],
        },
        Field {
            key: "extractor.unmatched_confidence",
            value: config.extractor.unmatched_confidence.to_string(),
            env_keys: &[],
        },
        Field {
            key: "executor.tool_timeout_ms",
            value: config.executor.tool_timeout_ms.to_string(),
            env_keys: &["PARLEY_EXECUTOR_TOOL_TIMEOUT_MS"],
        },
        Field {
            key: "store.retention_days",
            value: config.store.retention_days.to_string(),
            env_keys: &["PARLEY_STORE_RETENTION_DAYS"],
        },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{contains_path, field_source};

    #[test]
    fn file_source_is_reported_for_nested_keys() {
        let doc: toml::Value = "[planner]\nurgency_threshold = 0.9\n".parse().expect("toml");

        assert!(contains_path(&doc, "planner.urgency_threshold"));
        assert!(!contains_path(&doc, "planner.clarification_threshold"));
        let source = field_source(
            "planner.urgency_threshold",
            &[],
            Some(&doc),
            Some(Path::new("parley.toml")),
        );
        assert_eq!(source, "file (parley.toml)");
        assert_eq!(field_source("store.retention_days", &[], Some(&doc), None), "default");
    }
}
