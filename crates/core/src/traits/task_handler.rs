//! 任务处理接口
//!
//! 应用代码通过实现 [`TaskHandler`] 提供任务逻辑。Worker 和同步调用路径都只通过
//! 这个接口执行任务，二者的区别体现在 [`TaskContext::eager`] 上。
//!
//! ## 示例
//!
//! ```rust
//! use async_trait::async_trait;
//! use serde_json::{json, Map, Value};
//! use taskq_core::traits::{TaskContext, TaskError, TaskHandler};
//!
//! struct Add;
//!
//! #[async_trait]
//! impl TaskHandler for Add {
//!     async fn handle(
//!         &self,
//!         _ctx: &TaskContext,
//!         args: Vec<Value>,
//!         _kwargs: Map<String, Value>,
//!     ) -> Result<Value, TaskError> {
//!         let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
//!         Ok(json!(sum))
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// 任务执行上下文
#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    pub message_id: String,
    pub task_name: String,
    /// 本次执行之前已经执行过的次数
    pub retry_count: u32,
    pub max_retries: u32,
    pub queue: String,
    /// 是否为同步调用（不经过消息代理）
    pub eager: bool,
}

impl TaskContext {
    pub fn new(
        message_id: impl Into<String>,
        task_name: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            task_name: task_name.into(),
            retry_count: 0,
            max_retries: 0,
            queue: queue.into(),
            eager: false,
        }
    }

    /// 是否还允许继续重试
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// 任务处理结果中的错误信号
#[derive(Debug, Clone, PartialEq)]
pub enum TaskError {
    /// 显式请求重试；`delay` 和 `max_retries` 为空时使用任务的重试策略
    Retry {
        delay: Option<Duration>,
        max_retries: Option<u32>,
        reason: String,
    },
    /// 未处理的异常
    Fault(String),
}

impl TaskError {
    pub fn retry(reason: impl Into<String>) -> Self {
        TaskError::Retry {
            delay: None,
            max_retries: None,
            reason: reason.into(),
        }
    }

    pub fn retry_after(delay: Duration, reason: impl Into<String>) -> Self {
        TaskError::Retry {
            delay: Some(delay),
            max_retries: None,
            reason: reason.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        TaskError::Fault(message.into())
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Retry { reason, .. } => write!(f, "retry requested: {reason}"),
            TaskError::Fault(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Fault(err.to_string())
    }
}

/// 任务处理器接口
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError>;
}
