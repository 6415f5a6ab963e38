use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["parley.toml", "config/parley.toml"];

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub planner: PlannerConfig,
    pub extractor: ExtractorConfig,
    pub executor: ExecutorConfig,
    pub store: StoreConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Decision-tree thresholds. The defaults are the hand-tuned values the
/// dialogue behaviour was calibrated against.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannerConfig {
    pub clarification_threshold: f64,
    pub tool_completeness_threshold: f64,
    pub tool_relevance_threshold: f64,
    pub urgency_threshold: f64,
    pub low_completeness_threshold: f64,
    pub optional_slot_weight: f64,
    pub retry_tool_on_failure: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtractorConfig {
    pub carryover_confidence: f64,
    pub unmatched_confidence: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutorConfig {
    pub tool_timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    pub retention_days: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub tool_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://parley.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            planner: PlannerConfig::default(),
            extractor: ExtractorConfig::default(),
            executor: ExecutorConfig { tool_timeout_ms: 2_000 },
            store: StoreConfig { retention_days: 30 },
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            clarification_threshold: 0.5,
            tool_completeness_threshold: 0.8,
            tool_relevance_threshold: 0.8,
            urgency_threshold: 0.7,
            low_completeness_threshold: 0.5,
            optional_slot_weight: 0.2,
            retry_tool_on_failure: false,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self { carryover_confidence: 0.8, unmatched_confidence: 0.1 }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(planner) = patch.planner {
            let target = &mut self.planner;
            set_if(&mut target.clarification_threshold, planner.clarification_threshold);
            set_if(&mut target.tool_completeness_threshold, planner.tool_completeness_threshold);
            set_if(&mut target.tool_relevance_threshold, planner.tool_relevance_threshold);
            set_if(&mut target.urgency_threshold, planner.urgency_threshold);
            set_if(&mut target.low_completeness_threshold, planner.low_completeness_threshold);
            set_if(&mut target.optional_slot_weight, planner.optional_slot_weight);
            set_if(&mut target.retry_tool_on_failure, planner.retry_tool_on_failure);
        }

        if let Some(extractor) = patch.extractor {
            set_if(&mut self.extractor.carryover_confidence, extractor.carryover_confidence);
            set_if(&mut self.extractor.unmatched_confidence, extractor.unmatched_confidence);
        }

        if let Some(executor) = patch.executor {
            set_if(&mut self.executor.tool_timeout_ms, executor.tool_timeout_ms);
        }

        if let Some(store) = patch.store {
            set_if(&mut self.store.retention_days, store.retention_days);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PARLEY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PARLEY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_u16("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        let planner = &mut self.planner;
        if let Some(value) = read_env("PARLEY_PLANNER_CLARIFICATION_THRESHOLD") {
            planner.clarification_threshold =
                parse_f64("PARLEY_PLANNER_CLARIFICATION_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PARLEY_PLANNER_TOOL_COMPLETENESS_THRESHOLD") {
            planner.tool_completeness_threshold =
                parse_f64("PARLEY_PLANNER_TOOL_COMPLETENESS_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PARLEY_PLANNER_TOOL_RELEVANCE_THRESHOLD") {
            planner.tool_relevance_threshold =
                parse_f64("PARLEY_PLANNER_TOOL_RELEVANCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PARLEY_PLANNER_URGENCY_THRESHOLD") {
            planner.urgency_threshold = parse_f64("PARLEY_PLANNER_URGENCY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PARLEY_PLANNER_LOW_COMPLETENESS_THRESHOLD") {
            planner.low_completeness_threshold =
                parse_f64("PARLEY_PLANNER_LOW_COMPLETENESS_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("PARLEY_PLANNER_RETRY_TOOL_ON_FAILURE") {
            planner.retry_tool_on_failure =
                parse_bool("PARLEY_PLANNER_RETRY_TOOL_ON_FAILURE", &value)?;
        }

        if let Some(value) = read_env("PARLEY_EXECUTOR_TOOL_TIMEOUT_MS") {
            self.executor.tool_timeout_ms = parse_u64("PARLEY_EXECUTOR_TOOL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_STORE_RETENTION_DAYS") {
            self.store.retention_days = parse_u32("PARLEY_STORE_RETENTION_DAYS", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(tool_timeout_ms) = overrides.tool_timeout_ms {
            self.executor.tool_timeout_ms = tool_timeout_ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_planner(&self.planner)?;
        validate_extractor(&self.extractor)?;
        validate_executor(&self.executor)?;
        if self.store.retention_days == 0 {
            return Err(ConfigError::Validation(
                "store.retention_days must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_planner(planner: &PlannerConfig) -> Result<(), ConfigError> {
    let thresholds = [
        ("planner.clarification_threshold", planner.clarification_threshold),
        ("planner.tool_completeness_threshold", planner.tool_completeness_threshold),
        ("planner.tool_relevance_threshold", planner.tool_relevance_threshold),
        ("planner.urgency_threshold", planner.urgency_threshold),
        ("planner.low_completeness_threshold", planner.low_completeness_threshold),
        ("planner.optional_slot_weight", planner.optional_slot_weight),
    ];
    for (key, value) in thresholds {
        ensure_unit_interval(key, value)?;
    }
    Ok(())
}

fn validate_extractor(extractor: &ExtractorConfig) -> Result<(), ConfigError> {
    ensure_unit_interval("extractor.carryover_confidence", extractor.carryover_confidence)?;
    ensure_unit_interval("extractor.unmatched_confidence", extractor.unmatched_confidence)?;

    if extractor.unmatched_confidence >= 0.2 {
        return Err(ConfigError::Validation(
            "extractor.unmatched_confidence must stay below 0.2".to_string(),
        ));
    }
    Ok(())
}

fn validate_executor(executor: &ExecutorConfig) -> Result<(), ConfigError> {
    if executor.tool_timeout_ms == 0 || executor.tool_timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "executor.tool_timeout_ms must be in range 1..=60000".to_string(),
        ));
    }
    Ok(())
}

fn ensure_unit_interval(key: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must be in range 0.0..=1.0, got {value}")))
    }
}

fn set_if<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    planner: Option<PlannerPatch>,
    extractor: Option<ExtractorPatch>,
    executor: Option<ExecutorPatch>,
    store: Option<StorePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerPatch {
    clarification_threshold: Option<f64>,
    tool_completeness_threshold: Option<f64>,
    tool_relevance_threshold: Option<f64>,
    urgency_threshold: Option<f64>,
    low_completeness_threshold: Option<f64>,
    optional_slot_weight: Option<f64>,
    retry_tool_on_failure: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractorPatch {
    carryover_confidence: Option<f64>,
    unmatched_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutorPatch {
    tool_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    retention_days: Option<u32>,
}
