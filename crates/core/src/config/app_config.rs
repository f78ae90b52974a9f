use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::sections::{AppSection, BeatConfig, BrokerConfig, LoggingConfig, WorkerConfig};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/taskq.toml";

/// 兼容旧部署方式的扁平环境变量，映射到分层配置键
pub const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("APP_NAME", "app.name"),
    ("BROKER_URL", "broker.url"),
    ("CELERY_RESULT_BACKEND", "app.result_backend"),
    ("CELERY_TASK_SERIALIZER", "app.task_serializer"),
    ("CELERY_TASK_RESULT_EXPIRES", "app.result_expires_seconds"),
    ("CELERY_DEFAULT_QUEUE", "broker.default_queue"),
    ("FETCH_TASK_QUEUE", "broker.fetch_queue"),
    ("NOTIFY_TASK_QUEUE", "broker.notify_queue"),
    ("LIMIT_TASK", "broker.backlog_threshold"),
    ("CELERYD_TASK_TIME_LIMIT", "worker.task_time_limit_seconds"),
    ("CELERYD_MAX_TASKS_PER_CHILD", "worker.max_tasks_per_child"),
    ("CELERY_ACKS_LATE", "worker.acks_late"),
];

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub beat: BeatConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后者覆盖前者）：
    /// 1. 内置默认值
    /// 2. TOML 配置文件（显式指定的文件必须存在；默认路径不存在时跳过）
    /// 3. `TASKQ__SECTION__KEY` 环境变量
    /// 4. 旧版扁平环境变量（`BROKER_URL`、`LIMIT_TASK` 等）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    /// 与 [`AppConfig::load`] 相同，旧版环境变量通过 `lookup` 读取
    pub fn load_with<F>(config_path: Option<&str>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(anyhow::anyhow!("配置文件不存在: {}", path));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if Path::new(DEFAULT_CONFIG_PATH).exists() {
                    builder = builder.add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKQ")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("worker.queues")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV_VARS {
            let value = lookup(var).filter(|v| !v.trim().is_empty());
            builder = builder
                .set_override_option(*key, value)
                .with_context(|| format!("应用环境变量 {var} 失败"))?;
        }

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        self.app.validate().context("应用配置验证失败")?;
        self.broker.validate().context("消息代理配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.beat.validate().context("Beat配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        Ok(())
    }

    /// 默认队列：显式配置优先，否则使用应用名
    pub fn default_queue(&self) -> &str {
        if self.broker.default_queue.is_empty() {
            &self.app.name
        } else {
            &self.broker.default_queue
        }
    }

    /// 全部已配置队列（默认队列、抓取队列、通知队列），去重并保持顺序
    pub fn all_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        for queue in [
            self.default_queue(),
            self.broker.fetch_queue.as_str(),
            self.broker.notify_queue.as_str(),
        ] {
            if !queues.iter().any(|q| q == queue) {
                queues.push(queue.to_string());
            }
        }
        queues
    }

    /// Worker 消费的队列
    pub fn worker_queues(&self) -> Vec<String> {
        if self.worker.queues.is_empty() {
            self.all_queues()
        } else {
            self.worker.queues.clone()
        }
    }

    pub fn task_time_limit(&self) -> Option<std::time::Duration> {
        match self.worker.task_time_limit_seconds {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }

    pub fn max_tasks_per_child(&self) -> Option<usize> {
        match self.worker.max_tasks_per_child {
            0 => None,
            n => Some(n),
        }
    }
}
