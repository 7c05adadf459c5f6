//! relay-config
//!
//! Single-file YAML configuration: one `--config-path` flag, one file, no
//! layering or merging. `load` deserialises and validates in one step so
//! every caller gets a config it can trust without re-checking required
//! fields itself.

use std::collections::BTreeMap;
use std::path::Path;

use relay_model::RelayError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub datasource: DatasourceConfig,
    pub kafka: KafkaConfig,
    pub runner: RunnerConfig,
    pub tasks: BTreeMap<String, TaskConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            datasource: DatasourceConfig::default(),
            kafka: KafkaConfig::default(),
            runner: RunnerConfig::default(),
            tasks: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LevelConfig,
    pub file: FileConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub root: String,
}

impl Default for LevelConfig {
    fn default() -> Self {
        LevelConfig { root: "info".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    /// Empty name means stdout text output.
    pub name: String,
    /// "JSON" selects the structured formatter; anything else is plain text.
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DatasourceConfig {
    pub url: String,
    pub schema: String,
    pub username: String,
    pub password: String,
    pub connection_pool: ConnectionPoolConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    /// Seconds.
    pub max_life_time: u64,
    /// Seconds.
    pub max_idle_time: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub batch_size: u32,
    /// Milliseconds.
    pub batch_timeout: u32,
    pub required_acks: String,
    pub compress: bool,
    pub topic_auto_create: bool,
    /// Bytes.
    pub max_request_size: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        KafkaConfig {
            brokers: Vec::new(),
            batch_size: 50,
            batch_timeout: 10,
            required_acks: "one".to_string(),
            compress: false,
            topic_auto_create: false,
            max_request_size: 1_048_576,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub max_workers: u32,
    pub repeat_policy: RepeatPolicyConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            max_workers: 1,
            repeat_policy: RepeatPolicyConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// `max_workers = 0` is documented to mean "1", not "unbounded".
    pub fn effective_max_workers(&self) -> u32 {
        if self.max_workers == 0 { 1 } else { self.max_workers }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepeatPolicyConfig {
    /// Milliseconds.
    pub initial_interval: u64,
    /// Milliseconds.
    pub max_interval: u64,
    pub backoff_coefficient: u32,
}

impl Default for RepeatPolicyConfig {
    fn default() -> Self {
        RepeatPolicyConfig {
            initial_interval: 100,
            max_interval: 1000,
            backoff_coefficient: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TaskConfig {
    pub group_id: String,
    pub part_count: u32,
    pub batch_size: i32,
    pub topic: String,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct QueryConfig {
    pub columns: String,
    pub from: String,
    pub pk_column: String,
}

/// Load and validate the config file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Config, RelayError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("reading {}: {e}", path.display())))?;
    let cfg: Config = serde_yaml::from_str(&raw)
        .map_err(|e| RelayError::Config(format!("parsing {}: {e}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.kafka.brokers.is_empty() {
            return Err(RelayError::Config("kafka.brokers must be non-empty".into()));
        }
        if self.tasks.is_empty() {
            return Err(RelayError::Config("tasks must contain at least one entry".into()));
        }
        for (name, task) in &self.tasks {
            task.validate(name)?;
        }
        Ok(())
    }
}

impl TaskConfig {
    fn validate(&self, name: &str) -> Result<(), RelayError> {
        if self.group_id.is_empty() {
            return Err(RelayError::Config(format!("tasks.{name}.group_id is required")));
        }
        if self.topic.is_empty() {
            return Err(RelayError::Config(format!("tasks.{name}.topic is required")));
        }
        if self.batch_size <= 0 {
            return Err(RelayError::Config(format!("tasks.{name}.batch_size must be > 0")));
        }
        if self.query.from.is_empty() {
            return Err(RelayError::Config(format!("tasks.{name}.query.from is required")));
        }
        if self.query.columns.is_empty() {
            return Err(RelayError::Config(format!("tasks.{name}.query.columns is required")));
        }
        if self.query.pk_column.is_empty() {
            return Err(RelayError::Config(format!("tasks.{name}.query.pk_column is required")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
kafka:
  brokers:
    - "localhost:9092"
tasks:
  orders:
    group_id: orders
    part_count: 2
    batch_size: 100
    topic: orders.cdc
    query:
      columns: "*"
      from: "select * from orders"
      pk_column: id
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg: Config = serde_yaml::from_str(MINIMAL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.kafka.batch_size, 50);
        assert_eq!(cfg.kafka.required_acks, "one");
        assert_eq!(cfg.kafka.max_request_size, 1_048_576);
        assert_eq!(cfg.runner.max_workers, 1);
        assert_eq!(cfg.runner.repeat_policy.initial_interval, 100);
        assert_eq!(cfg.runner.repeat_policy.max_interval, 1000);
        assert_eq!(cfg.runner.repeat_policy.backoff_coefficient, 2);
        assert_eq!(cfg.logging.level.root, "info");
    }

    #[test]
    fn zero_max_workers_is_treated_as_one() {
        let mut cfg: Config = serde_yaml::from_str(MINIMAL).unwrap();
        cfg.runner.max_workers = 0;
        assert_eq!(cfg.runner.effective_max_workers(), 1);
    }

    #[test]
    fn missing_brokers_fails_validation() {
        let yaml = r#"
tasks:
  orders:
    group_id: orders
    part_count: 1
    batch_size: 1
    topic: orders.cdc
    query:
      columns: "*"
      from: "select * from orders"
      pk_column: id
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn missing_task_field_fails_validation() {
        let yaml = r#"
kafka:
  brokers:
    - "localhost:9092"
tasks:
  orders:
    group_id: orders
    part_count: 1
    batch_size: 1
    topic: orders.cdc
    query:
      columns: "*"
      from: ""
      pk_column: id
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = load("/nonexistent/path/application.yml").unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
