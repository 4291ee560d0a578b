use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    dispatcher_invoker::{DispatcherConfig, InvokerConfig},
    observability::ObservabilityConfig,
    task_manager::TaskManagerConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub task_manager: TaskManagerConfig,
    pub dispatcher: DispatcherConfig,
    pub invoker: InvokerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCHEDULER, separator: `__`)
    ///
    /// # Arguments
    ///
    /// * `config_path` - Config file path, if None use default paths
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // 1. Load config file if provided
        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/scheduler.toml",
                "scheduler.toml",
                "/etc/scheduler/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        // 2. Environment variable overrides - highest priority
        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.task_manager
            .validate()
            .context("任务管理器配置验证失败")?;
        self.dispatcher.validate().context("调度器配置验证失败")?;
        self.invoker.validate().context("调用器配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[database]
url = "sqlite::memory:"
max_connections = 1
min_connections = 1
connection_timeout_seconds = 5
idle_timeout_seconds = 60

[task_manager]
greenfield_task_step = 500
max_attempts = 4

[task_manager.tables]
tasks = "live"
closed_tasks = "closed"
retry_tasks = "retry"

[task_manager.field_names]
task_id = "tid"

[task_manager.labourers.some_lambda]
arn = "http://localhost:9000/some_lambda"
max_simultaneous_invocations = 10
foo = "bar"
"#;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_manager.greenfield_task_step, 1000);
        assert_eq!(config.task_manager.greenfield_invocation_delta, 31_557_600);
        assert_eq!(config.task_manager.max_attempts, 3);
    }

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.task_manager.greenfield_task_step, 500);
        assert_eq!(config.task_manager.max_attempts, 4);
        assert_eq!(config.task_manager.tables.tasks, "live");
        assert_eq!(
            config.task_manager.field_names.get("task_id").map(String::as_str),
            Some("tid")
        );
        let labourer = &config.task_manager.labourers["some_lambda"];
        assert_eq!(labourer["foo"], serde_json::json!("bar"));
        // 未填写的部分使用默认值
        assert_eq!(config.dispatcher.schedule_interval_seconds, 10);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let serialized = config.to_toml().unwrap();
        let reparsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(reparsed.task_manager.tables, config.task_manager.tables);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert!(config.task_manager.labourers.contains_key("some_lambda"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_tables() {
        let mut config = AppConfig::default();
        config.task_manager.tables.retry_tasks = config.task_manager.tables.tasks.clone();
        assert!(config.validate().is_err());
    }
}
