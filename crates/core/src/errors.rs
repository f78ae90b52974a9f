use thiserror::Error;

/// 任务队列错误类型定义
#[derive(Debug, Error)]
pub enum TaskqError {
    #[error("任务名称重复: {name}")]
    DuplicateTaskName { name: String },

    #[error("未注册的任务: {name}")]
    UnknownTask { name: String },

    #[error("消息代理不可用: {0}")]
    BrokerUnavailable(String),

    #[error("任务执行异常: {task}: {message}")]
    HandlerFault { task: String, message: String },

    #[error("任务请求重试: {task} (延迟 {delay_seconds} 秒): {reason}")]
    RetryRequested {
        task: String,
        delay_seconds: u64,
        reason: String,
    },

    #[error("任务 {task} 已超过最大重试次数 {max_retries}")]
    MaxRetriesExceeded { task: String, max_retries: u32 },

    #[error("加载任务模块失败: {module}: {message}")]
    ImportFailure { module: String, message: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),

    #[error("任务执行超时: {task} ({limit_seconds} 秒)")]
    TimeLimitExceeded { task: String, limit_seconds: u64 },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("消息代理不支持该操作: {0}")]
    UnsupportedOperation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaskqError {
    /// 传输层故障，调用方可以自行退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskqError::BrokerUnavailable(_))
    }

    pub fn broker<E: std::fmt::Display>(context: &str, err: E) -> Self {
        TaskqError::BrokerUnavailable(format!("{context}: {err}"))
    }
}

impl From<serde_json::Error> for TaskqError {
    fn from(err: serde_json::Error) -> Self {
        TaskqError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type TaskqResult<T> = std::result::Result<T, TaskqError>;
