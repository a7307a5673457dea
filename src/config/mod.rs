// src/config/mod.rs

//! Engine configuration
//!
//! Settings are merged from layers in priority order:
//! - Built-in defaults
//! - Configuration files (YAML, JSON, TOML, picked by extension)
//! - Environment variables (`DOCBATCH__TASKS__SLOW_CHECKPOINT_WARN_MS=250`)
//! - In-memory overrides

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const DEFAULT_ENV_PREFIX: &str = "DOCBATCH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub tasks: TaskConfig,
    pub events: EventBusConfig,
}

impl EngineConfig {
    /// Defaults overlaid with a single configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        loader.add_file_layer("file", path, 10)?;
        loader.load()
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.events.max_subscriptions == 0 {
            errors.push("events.max_subscriptions must be greater than zero".to_string());
        }
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.logging.level) {
            errors.push(format!("logging.level '{}' is invalid: {}", self.logging.level, e));
        }
        if self.tasks.slow_checkpoint_warn_ms == Some(0) {
            errors.push("tasks.slow_checkpoint_warn_ms must be greater than zero when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let message = format!("Invalid configuration: {}", errors.join("; "));
            Err(Error::config_key("engine", errors, message).source("config_loader"))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `docbatch=debug,info`
    pub level: String,
    pub format: LogFormat,
    pub console: ConsoleLogConfig,
    pub file: Option<FileLogConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            console: ConsoleLogConfig::default(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleLogConfig {
    pub enabled: bool,
    pub colored: bool,
}

impl Default for ConsoleLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            colored: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    pub path: PathBuf,
    pub rotation: LogRotation,
    pub max_files: Option<usize>,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./logs/docbatch.log"),
            rotation: LogRotation::Daily,
            max_files: Some(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Warn when two checkpoints of a task are further apart than this
    pub slow_checkpoint_warn_ms: Option<u64>,
    pub emit_progress_events: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            slow_checkpoint_warn_ms: None,
            emit_progress_events: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub max_subscriptions: usize,
    pub log_deliveries: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 1024,
            log_deliveries: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    File { path: PathBuf, format: ConfigFormat },
    Environment { prefix: String },
    Memory { data: Value },
}

#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub name: String,
    pub source: ConfigSource,
    pub priority: u32,
}

/// Merges configuration layers on top of [`EngineConfig::default`]
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    layers: Vec<ConfigLayer>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file_layer<P: AsRef<Path>>(
        &mut self,
        name: impl Into<String>,
        path: P,
        priority: u32,
    ) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let format = ConfigFormat::from_extension(&path).ok_or_else(|| {
            Error::config(format!(
                "Unsupported configuration file format: {}",
                path.display()
            ))
        })?;

        self.push(ConfigLayer {
            name: name.into(),
            source: ConfigSource::File { path, format },
            priority,
        });
        Ok(())
    }

    pub fn add_env_layer(&mut self, name: impl Into<String>, prefix: impl Into<String>, priority: u32) {
        self.push(ConfigLayer {
            name: name.into(),
            source: ConfigSource::Environment {
                prefix: prefix.into(),
            },
            priority,
        });
    }

    pub fn add_memory_layer(&mut self, name: impl Into<String>, data: Value, priority: u32) {
        self.push(ConfigLayer {
            name: name.into(),
            source: ConfigSource::Memory { data },
            priority,
        });
    }

    fn push(&mut self, layer: ConfigLayer) {
        self.layers.push(layer);
        self.layers.sort_by_key(|l| l.priority);
    }

    pub fn load(&self) -> Result<EngineConfig> {
        let mut merged = serde_json::to_value(EngineConfig::default())?;

        // lowest priority first
        for layer in &self.layers {
            let layer_config = load_layer(layer)?;
            tracing::debug!("Merging configuration layer '{}'", layer.name);
            merge_values(&mut merged, layer_config);
        }

        let config: EngineConfig = serde_json::from_value(merged).map_err(|e| {
            Error::config(format!("Failed to deserialize configuration: {}", e)).caused_by(e)
        })?;
        config.validate()?;
        Ok(config)
    }
}

fn load_layer(layer: &ConfigLayer) -> Result<Value> {
    match &layer.source {
        ConfigSource::File { path, format } => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::config(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;

            match format {
                ConfigFormat::Json => serde_json::from_str(&content)
                    .map_err(|e| Error::config(format!("Failed to parse JSON config: {}", e))),
                ConfigFormat::Yaml => serde_yaml::from_str(&content)
                    .map_err(|e| Error::config(format!("Failed to parse YAML config: {}", e))),
                ConfigFormat::Toml => toml::from_str(&content)
                    .map_err(|e| Error::config(format!("Failed to parse TOML config: {}", e))),
            }
        }
        ConfigSource::Environment { prefix } => Ok(env_layer(prefix, std::env::vars())),
        ConfigSource::Memory { data } => Ok(data.clone()),
    }
}

/// `PREFIX__SECTION__KEY=value` becomes `{"section": {"key": value}}`
fn env_layer(prefix: &str, vars: impl Iterator<Item = (String, String)>) -> Value {
    let mut env_config = Map::new();

    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let rest = rest.trim_start_matches('_').to_lowercase();
        if rest.is_empty() {
            continue;
        }
        let nested_keys: Vec<&str> = rest.split("__").collect();
        let parsed = serde_json::from_str(&value).unwrap_or(Value::String(value));
        set_nested(&mut env_config, &nested_keys, parsed);
    }

    Value::Object(env_config)
}

fn set_nested(target: &mut Map<String, Value>, keys: &[&str], value: Value) {
    match keys {
        [] => {}
        [last] => {
            target.insert((*last).to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = target
                .entry((*first).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(map) = entry {
                set_nested(map, rest, value);
            }
        }
    }
}

fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => merge_values(target_value, source_value),
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_ok!(config.validate());
        assert_eq!(config.events.max_subscriptions, 1024);
        assert!(config.tasks.emit_progress_events);
        assert_eq!(config.tasks.slow_checkpoint_warn_ms, None);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension(Path::new("a.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_extension(Path::new("a.toml")), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension(Path::new("a.json")), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension(Path::new("a.ini")), None);
    }

    #[test]
    fn test_unsupported_file_layer() {
        let mut loader = ConfigLoader::new();
        assert_err!(loader.add_file_layer("bad", "settings.ini", 0));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "tasks:\n  slow_checkpoint_warn_ms: 250\nevents:\n  max_subscriptions: 8\nlogging:\n  format: json"
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tasks.slow_checkpoint_warn_ms, Some(250));
        assert!(config.tasks.emit_progress_events);
        assert_eq!(config.events.max_subscriptions, 8);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[tasks]\nemit_progress_events = false\n\n[events]\nlog_deliveries = true").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(!config.tasks.emit_progress_events);
        assert!(config.events.log_deliveries);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut loader = ConfigLoader::new();
        loader.add_memory_layer(
            "overrides",
            serde_json::json!({ "events": { "max_subscriptions": 0 } }),
            0,
        );
        let error = assert_err!(loader.load());
        assert!(error.message.contains("max_subscriptions"));
    }

    #[test]
    fn test_priority_order() {
        let mut loader = ConfigLoader::new();
        loader.add_memory_layer("high", serde_json::json!({ "events": { "max_subscriptions": 2 } }), 20);
        loader.add_memory_layer("low", serde_json::json!({ "events": { "max_subscriptions": 1 } }), 10);

        let config = loader.load().unwrap();
        assert_eq!(config.events.max_subscriptions, 2);
    }

    #[test]
    fn test_env_layer_parsing() {
        let vars = vec![
            ("DOCBATCH__TASKS__SLOW_CHECKPOINT_WARN_MS".to_string(), "500".to_string()),
            ("DOCBATCH__LOGGING__LEVEL".to_string(), "debug".to_string()),
            ("OTHER__TASKS__EMIT_PROGRESS_EVENTS".to_string(), "false".to_string()),
        ];

        let value = env_layer(DEFAULT_ENV_PREFIX, vars.into_iter());
        assert_eq!(value["tasks"]["slow_checkpoint_warn_ms"], serde_json::json!(500));
        assert_eq!(value["logging"]["level"], serde_json::json!("debug"));
        assert!(value.get("emit_progress_events").is_none());
    }

    #[test]
    fn test_env_layer_from_process_environment() {
        std::env::set_var("DOCBATCHTEST__EVENTS__MAX_SUBSCRIPTIONS", "3");
        let mut loader = ConfigLoader::new();
        loader.add_env_layer("env", "DOCBATCHTEST", 100);
        let config = loader.load().unwrap();
        std::env::remove_var("DOCBATCHTEST__EVENTS__MAX_SUBSCRIPTIONS");

        assert_eq!(config.events.max_subscriptions, 3);
    }
}
