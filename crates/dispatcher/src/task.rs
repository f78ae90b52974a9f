//! 任务定义
//!
//! 任务有两种写法：
//!
//! - 函数式：通过 [`FnTask`] 构建器包装一个闭包（异步或阻塞）
//! - 结构体式：实现 [`Task`] 元数据接口和 [`TaskHandler`]，再用 [`TaskDefinition::from_task`] 转换
//!
//! ```rust
//! use serde_json::json;
//! use taskq_core::models::{RecurrenceSpec, TaskSchedule};
//! use taskq_dispatcher::task::FnTask;
//!
//! let definition = FnTask::new("my_celery_mq.tasks.heartbeat")
//!     .queue("notify_queue")
//!     .schedule(TaskSchedule::new(RecurrenceSpec::every(10)))
//!     .blocking(|_ctx, _args, _kwargs| Ok(json!(true)));
//! assert_eq!(definition.name, "my_celery_mq.tasks.heartbeat");
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use taskq_core::models::TaskSchedule;
use taskq_core::traits::{TaskContext, TaskError, TaskHandler};

use crate::retry_service::RetryPolicy;

/// 结构体式任务的元数据
pub trait Task: TaskHandler {
    fn name(&self) -> String;

    fn queue(&self) -> Option<String> {
        None
    }

    fn schedule(&self) -> Option<TaskSchedule> {
        None
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn time_limit(&self) -> Option<Duration> {
        None
    }
}

/// 待注册的任务定义
pub struct TaskDefinition {
    pub name: String,
    pub queue: Option<String>,
    /// 注册时被移入调度表
    pub schedule: Option<TaskSchedule>,
    pub retry_policy: RetryPolicy,
    pub time_limit: Option<Duration>,
    pub handler: Arc<dyn TaskHandler>,
}

impl TaskDefinition {
    pub fn from_task<T: Task + 'static>(task: T) -> Self {
        Self {
            name: task.name(),
            queue: task.queue(),
            schedule: task.schedule(),
            retry_policy: task.retry_policy(),
            time_limit: task.time_limit(),
            handler: Arc::new(task),
        }
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("schedule", &self.schedule)
            .field("retry_policy", &self.retry_policy)
            .field("time_limit", &self.time_limit)
            .finish_non_exhaustive()
    }
}

/// 函数式任务构建器
#[derive(Debug, Clone)]
pub struct FnTask {
    name: String,
    queue: Option<String>,
    schedule: Option<TaskSchedule>,
    retry_policy: RetryPolicy,
    time_limit: Option<Duration>,
}

impl FnTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            schedule: None,
            retry_policy: RetryPolicy::default(),
            time_limit: None,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn schedule(mut self, schedule: TaskSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// 使用异步闭包作为任务体
    pub fn handler<F, Fut>(self, f: F) -> TaskDefinition
    where
        F: Fn(TaskContext, Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.build(Arc::new(AsyncFnHandler { f }))
    }

    /// 使用阻塞闭包作为任务体，执行时放到阻塞线程池
    pub fn blocking<F>(self, f: F) -> TaskDefinition
    where
        F: Fn(&TaskContext, Vec<Value>, Map<String, Value>) -> Result<Value, TaskError>
            + Send
            + Sync
            + 'static,
    {
        self.build(Arc::new(BlockingFnHandler { f: Arc::new(f) }))
    }

    fn build(self, handler: Arc<dyn TaskHandler>) -> TaskDefinition {
        TaskDefinition {
            name: self.name,
            queue: self.queue,
            schedule: self.schedule,
            retry_policy: self.retry_policy,
            time_limit: self.time_limit,
            handler,
        }
    }
}

struct AsyncFnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for AsyncFnHandler<F>
where
    F: Fn(TaskContext, Vec<Value>, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn handle(
        &self,
        ctx: &TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        (self.f)(ctx.clone(), args, kwargs).await
    }
}

struct BlockingFnHandler<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> TaskHandler for BlockingFnHandler<F>
where
    F: Fn(&TaskContext, Vec<Value>, Map<String, Value>) -> Result<Value, TaskError>
        + Send
        + Sync
        + 'static,
{
    async fn handle(
        &self,
        ctx: &TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let f = Arc::clone(&self.f);
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || f(&ctx, args, kwargs))
            .await
            .map_err(|e| TaskError::fault(format!("阻塞任务异常退出: {e}")))?
    }
}
