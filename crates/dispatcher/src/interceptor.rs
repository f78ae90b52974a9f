use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{error, info};

use taskq_core::logging::{short_log, LOG_PARAM_LEN};
use taskq_core::models::EnqueuedMessage;
use taskq_core::TaskqResult;

/// 分发拦截器
///
/// 入队和同步调用各有一对钩子。按注册顺序执行 `before_*`，任一拦截器返回错误则
/// 放弃本次调用；`after_*` 总会执行，可看到调用结果。
#[async_trait]
pub trait DispatchInterceptor: Send + Sync {
    async fn before_enqueue(&self, _message: &mut EnqueuedMessage) -> TaskqResult<()> {
        Ok(())
    }

    async fn after_enqueue(&self, _message: &EnqueuedMessage, _result: &TaskqResult<String>) {}

    async fn before_invoke(
        &self,
        _task_name: &str,
        _args: &[Value],
        _kwargs: &Map<String, Value>,
    ) -> TaskqResult<()> {
        Ok(())
    }

    async fn after_invoke(&self, _task_name: &str, _result: &TaskqResult<Value>) {}
}

/// 记录每次入队的拦截器，参数过长时截断
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    max_len: usize,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self {
            max_len: LOG_PARAM_LEN,
        }
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchInterceptor for LoggingInterceptor {
    async fn after_enqueue(&self, message: &EnqueuedMessage, result: &TaskqResult<String>) {
        let params = short_log(&message.content_key(), self.max_len);
        match result {
            Ok(id) => info!(
                task_name = %message.task_name,
                message_id = %id,
                queue = %message.queue,
                retries = message.retry_count,
                "send_task: {}",
                params
            ),
            Err(e) => error!(
                task_name = %message.task_name,
                queue = %message.queue,
                "send_task 失败: {}, 参数: {}",
                e,
                params
            ),
        }
    }

    async fn before_invoke(
        &self,
        task_name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> TaskqResult<()> {
        let params = serde_json::to_string(&(args, kwargs)).unwrap_or_default();
        info!(
            task_name = %task_name,
            "apply: {}",
            short_log(&params, self.max_len)
        );
        Ok(())
    }

    async fn after_invoke(&self, task_name: &str, result: &TaskqResult<Value>) {
        if let Err(e) = result {
            error!(task_name = %task_name, "apply 失败: {}", e);
        }
    }
}
