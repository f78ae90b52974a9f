use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// 应用级配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 应用名，任务名前缀，也是默认队列名
    pub name: String,
    /// CRON 计算使用的时区，固定偏移，如 `+08:00`、`UTC`
    pub timezone: String,
    pub task_serializer: String,
    /// 结果存储地址，为空表示不保存结果
    pub result_backend: String,
    pub result_expires_seconds: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "my_celery_mq".to_string(),
            timezone: "+08:00".to_string(),
            task_serializer: "json".to_string(),
            result_backend: String::new(),
            result_expires_seconds: 3600,
        }
    }
}

impl AppSection {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("应用名不能为空"));
        }

        if !self.task_serializer.eq_ignore_ascii_case("json") {
            return Err(anyhow::anyhow!(
                "不支持的任务序列化方式: {}，支持: json",
                self.task_serializer
            ));
        }

        self.timezone_offset()?;
        Ok(())
    }

    /// 解析时区偏移
    pub fn timezone_offset(&self) -> anyhow::Result<FixedOffset> {
        parse_offset(&self.timezone)
            .ok_or_else(|| anyhow::anyhow!("无效的时区偏移: {}", self.timezone))
    }
}

fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.chars().next()? {
        '+' => (1, &value[1..]),
        '-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if hours > 14 || minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// 消息代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    /// 默认队列，为空时使用应用名
    pub default_queue: String,
    pub fetch_queue: String,
    pub notify_queue: String,
    /// 队列积压阈值，超过后才做重复任务清理
    pub backlog_threshold: usize,
    /// 清理周期，0 表示不清理
    pub compaction_interval_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "sqla+sqlite://db.sqlite".to_string(),
            default_queue: String::new(),
            fetch_queue: "fetch_queue".to_string(),
            notify_queue: "notify_queue".to_string(),
            backlog_threshold: 1000,
            compaction_interval_seconds: 60,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow::anyhow!("消息代理地址不能为空"));
        }

        if !self.url.contains("://") {
            return Err(anyhow::anyhow!("消息代理地址格式无效: {}", self.url));
        }

        if self.fetch_queue.is_empty() || self.notify_queue.is_empty() {
            return Err(anyhow::anyhow!("队列名不能为空"));
        }

        Ok(())
    }
}

/// Worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// 单个子循环处理多少条消息后回收，0 表示不回收
    pub max_tasks_per_child: usize,
    /// 单个任务的执行时限，0 表示不限制
    pub task_time_limit_seconds: u64,
    pub acks_late: bool,
    /// 队列为空时的轮询间隔
    pub poll_interval_ms: u64,
    /// 连续多少次访问消息代理失败后退出
    pub max_broker_failures: u32,
    /// 消费的队列，为空时消费全部已配置队列
    pub queues: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_tasks_per_child: 100,
            task_time_limit_seconds: 0,
            acks_late: false,
            poll_interval_ms: 500,
            max_broker_failures: 10,
            queues: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("Worker并发数必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.max_broker_failures == 0 {
            return Err(anyhow::anyhow!("消息代理最大失败次数必须大于0"));
        }

        Ok(())
    }
}

/// Beat调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    pub tick_interval_ms: u64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

impl BeatConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// pretty 或 json
    pub format: String,
    /// 日志文件，为空时使用 `logs/{mode}.log`
    pub file: String,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: String::new(),
            max_files: 30,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持: {:?}",
                self.level,
                valid_levels
            ));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志格式: {}，支持: {:?}",
                self.format,
                valid_formats
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("+08:00"), FixedOffset::east_opt(8 * 3600));
        assert_eq!(parse_offset("-05:30"), FixedOffset::east_opt(-(5 * 3600 + 1800)));
        assert_eq!(parse_offset("UTC"), FixedOffset::east_opt(0));
        assert_eq!(parse_offset("+8"), FixedOffset::east_opt(8 * 3600));
        assert!(parse_offset("Asia/Shanghai").is_none());
        assert!(parse_offset("+25:00").is_none());
    }
}
