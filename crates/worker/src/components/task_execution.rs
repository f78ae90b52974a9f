use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn, Instrument};

use taskq_core::logging::{short_log, LOG_PARAM_LEN};
use taskq_core::models::{EnqueuedMessage, TaskState};
use taskq_core::traits::{ResultBackend, TaskContext, TaskError};
use taskq_core::TaskqError;
use taskq_dispatcher::{Dispatcher, RetryDecision};

/// 单条消息的执行结果
#[derive(Debug)]
pub enum ExecutionOutcome {
    Succeeded(Value),
    /// 已重新入队
    Retried {
        retry_count: u32,
        eta: Option<DateTime<Utc>>,
    },
    /// 终止失败，不再执行
    Failed(TaskqError),
}

impl ExecutionOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionOutcome::Retried { .. })
    }
}

/// 任务执行管理器
///
/// 查找任务、执行处理器、处理超时与重试，并把最终状态写入结果后端。
pub struct TaskExecutionManager {
    dispatcher: Arc<Dispatcher>,
    result_backend: Option<Arc<dyn ResultBackend>>,
    default_time_limit: Option<Duration>,
}

impl TaskExecutionManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        result_backend: Option<Arc<dyn ResultBackend>>,
        default_time_limit: Option<Duration>,
    ) -> Self {
        Self {
            dispatcher,
            result_backend,
            default_time_limit,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn execute(&self, message: EnqueuedMessage) -> ExecutionOutcome {
        let span = tracing::info_span!(
            "task",
            task_name = %message.task_name,
            message_id = %message.id,
            queue = %message.queue
        );
        self.execute_inner(message).instrument(span).await
    }

    async fn execute_inner(&self, message: EnqueuedMessage) -> ExecutionOutcome {
        let descriptor = match self.dispatcher.registry().lookup(&message.task_name) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("收到未注册的任务，丢弃: {}", e);
                self.store(TaskState::failure(
                    &message.id,
                    &message.task_name,
                    e.to_string(),
                    message.retry_count,
                ))
                .await;
                return ExecutionOutcome::Failed(e);
            }
        };

        info!(
            "开始执行任务: 重试次数={}, 参数={}",
            message.retry_count,
            short_log(&message.content_key(), LOG_PARAM_LEN)
        );

        let mut ctx = TaskContext::new(
            message.id.clone(),
            message.task_name.clone(),
            message.queue.clone(),
        );
        ctx.retry_count = message.retry_count;
        ctx.max_retries = descriptor.retry_policy.max_retries;

        let handler = Arc::clone(&descriptor.handler);
        let args = message.args.clone();
        let kwargs = message.kwargs.clone();
        let mut execution =
            tokio::spawn(async move { handler.handle(&ctx, args, kwargs).await });

        let time_limit = descriptor.time_limit.or(self.default_time_limit);
        let joined = match time_limit {
            Some(limit) => match tokio::time::timeout(limit, &mut execution).await {
                Ok(joined) => joined,
                Err(_) => {
                    execution.abort();
                    let err = TaskqError::TimeLimitExceeded {
                        task: message.task_name.clone(),
                        limit_seconds: limit.as_secs(),
                    };
                    warn!("{}", err);
                    return self.fail(&message, err).await;
                }
            },
            None => execution.await,
        };

        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(TaskError::fault(format!("任务异常退出: {e}"))),
        };

        match result {
            Ok(value) => {
                info!("任务执行成功: {}", short_log(&value.to_string(), LOG_PARAM_LEN));
                self.store(TaskState::success(
                    &message.id,
                    &message.task_name,
                    value.clone(),
                    message.retry_count,
                ))
                .await;
                ExecutionOutcome::Succeeded(value)
            }
            Err(task_error) => {
                match descriptor
                    .retry_policy
                    .decide(message.retry_count, &task_error)
                {
                    RetryDecision::Retry { delay, reason } => {
                        self.retry(&message, delay, reason).await
                    }
                    RetryDecision::Exhausted {
                        max_retries,
                        reason,
                    } => {
                        warn!("任务重试次数已用完: {}", reason);
                        let err = TaskqError::MaxRetriesExceeded {
                            task: message.task_name.clone(),
                            max_retries,
                        };
                        self.fail(&message, err).await
                    }
                    RetryDecision::Fail { message: fault } => {
                        let err = TaskqError::HandlerFault {
                            task: message.task_name.clone(),
                            message: fault,
                        };
                        self.fail(&message, err).await
                    }
                }
            }
        }
    }

    async fn retry(
        &self,
        message: &EnqueuedMessage,
        delay: Duration,
        reason: String,
    ) -> ExecutionOutcome {
        let next = message.next_retry(delay, Utc::now());
        let retry_count = next.retry_count;
        let eta = next.eta;

        match self.dispatcher.enqueue_message(next).await {
            Ok(_) => {
                warn!(
                    "任务将在 {:?} 后重试 (第 {} 次): {}",
                    delay, retry_count, reason
                );
                self.store(TaskState::retry(
                    &message.id,
                    &message.task_name,
                    reason,
                    message.retry_count,
                ))
                .await;
                ExecutionOutcome::Retried { retry_count, eta }
            }
            Err(e) => {
                error!("重试消息入队失败: {}", e);
                self.fail(message, e).await
            }
        }
    }

    async fn fail(&self, message: &EnqueuedMessage, err: TaskqError) -> ExecutionOutcome {
        error!("任务执行失败: {}", err);
        self.store(TaskState::failure(
            &message.id,
            &message.task_name,
            err.to_string(),
            message.retry_count,
        ))
        .await;
        ExecutionOutcome::Failed(err)
    }

    async fn store(&self, state: TaskState) {
        if let Some(backend) = &self.result_backend {
            if let Err(e) = backend.store(&state).await {
                warn!("写入任务结果失败: task_id={}, error={}", state.task_id, e);
            }
        }
    }
}
