use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

use taskq_core::codec::Codec;
use taskq_core::models::EnqueuedMessage;
use taskq_core::traits::{Broker, TaskContext, TaskError};
use taskq_core::{TaskqError, TaskqResult};

use crate::interceptor::DispatchInterceptor;
use crate::registry::{TaskDescriptor, TaskRegistry};

/// 入队选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    /// 指定队列，优先于任务自身的队列
    pub queue: Option<String>,
    /// 延迟执行，`eta` 存在时忽略
    pub countdown: Option<Duration>,
    pub eta: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn countdown(mut self, countdown: Duration) -> Self {
        self.countdown = Some(countdown);
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// 任务分发器
///
/// 负责把任务调用转换成消息写入消息代理，或者在当前上下文中同步执行。
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    codec: Arc<dyn Codec>,
    default_queue: String,
    interceptors: Vec<Arc<dyn DispatchInterceptor>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        broker: Arc<dyn Broker>,
        codec: Arc<dyn Codec>,
        default_queue: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            broker,
            codec,
            default_queue: default_queue.into(),
            interceptors: Vec::new(),
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn DispatchInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// 队列优先级：调用时指定 > 任务定义 > 默认队列
    pub fn resolve_queue(&self, descriptor: &TaskDescriptor, explicit: Option<&str>) -> String {
        explicit
            .or(descriptor.queue.as_deref())
            .unwrap_or(&self.default_queue)
            .to_string()
    }

    /// 异步调用：写入消息代理，返回消息ID
    #[instrument(skip(self, args, kwargs, options))]
    pub async fn enqueue(
        &self,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        options: EnqueueOptions,
    ) -> TaskqResult<String> {
        let descriptor = self.registry.lookup(task_name)?;
        let queue = self.resolve_queue(&descriptor, options.queue.as_deref());

        let mut message = EnqueuedMessage::new(descriptor.name.clone(), queue)
            .with_args(args)
            .with_kwargs(kwargs)
            .with_retry_count(options.retry_count);
        if let Some(eta) = options.eta {
            message = message.with_eta(eta);
        } else if let Some(countdown) = options.countdown {
            message = message.with_countdown(countdown);
        }

        self.enqueue_message(message).await
    }

    /// 写入已构建好的消息（重试消息也走这里）
    pub async fn enqueue_message(&self, mut message: EnqueuedMessage) -> TaskqResult<String> {
        let mut result = Ok(());
        for interceptor in &self.interceptors {
            result = interceptor.before_enqueue(&mut message).await;
            if result.is_err() {
                break;
            }
        }

        let result = match result {
            Ok(()) => self.publish(&message).await,
            Err(e) => Err(e),
        };

        for interceptor in &self.interceptors {
            interceptor.after_enqueue(&message, &result).await;
        }
        result
    }

    async fn publish(&self, message: &EnqueuedMessage) -> TaskqResult<String> {
        let payload = self.codec.encode(message)?;
        self.broker.push(&message.queue, payload).await?;
        debug!(
            "消息已写入队列 {}: task={}, id={}",
            message.queue, message.task_name, message.id
        );
        Ok(message.id.clone())
    }

    /// 同步调用：不经过消息代理，直接执行并返回结果
    #[instrument(skip(self, args, kwargs))]
    pub async fn invoke_sync(
        &self,
        task_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> TaskqResult<Value> {
        let descriptor = self.registry.lookup(task_name)?;

        let mut result = Ok(());
        for interceptor in &self.interceptors {
            result = interceptor
                .before_invoke(&descriptor.name, &args, &kwargs)
                .await;
            if result.is_err() {
                break;
            }
        }

        let result = match result {
            Ok(()) => self.execute_eager(&descriptor, args, kwargs).await,
            Err(e) => Err(e),
        };

        for interceptor in &self.interceptors {
            interceptor.after_invoke(&descriptor.name, &result).await;
        }
        result
    }

    async fn execute_eager(
        &self,
        descriptor: &TaskDescriptor,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> TaskqResult<Value> {
        let mut ctx = TaskContext::new(
            Uuid::new_v4().to_string(),
            descriptor.name.clone(),
            self.resolve_queue(descriptor, None),
        );
        ctx.max_retries = descriptor.retry_policy.max_retries;
        ctx.eager = true;

        match descriptor.handler.handle(&ctx, args, kwargs).await {
            Ok(value) => Ok(value),
            Err(TaskError::Retry { delay, reason, .. }) => {
                let delay = delay.unwrap_or_else(|| descriptor.retry_policy.delay_for(0));
                Err(TaskqError::RetryRequested {
                    task: descriptor.name.clone(),
                    delay_seconds: delay.as_secs(),
                    reason,
                })
            }
            Err(TaskError::Fault(message)) => Err(TaskqError::HandlerFault {
                task: descriptor.name.clone(),
                message,
            }),
        }
    }

    /// 获取单个任务的调用入口
    pub fn task(&self, name: &str) -> TaskqResult<TaskCaller<'_>> {
        let descriptor = self.registry.lookup(name)?;
        Ok(TaskCaller {
            dispatcher: self,
            descriptor,
        })
    }
}

/// 单个任务的调用入口，区分异步入队和同步执行
pub struct TaskCaller<'a> {
    dispatcher: &'a Dispatcher,
    descriptor: Arc<TaskDescriptor>,
}

impl TaskCaller<'_> {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub async fn enqueue(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> TaskqResult<String> {
        self.enqueue_with(args, kwargs, EnqueueOptions::default())
            .await
    }

    pub async fn enqueue_with(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        options: EnqueueOptions,
    ) -> TaskqResult<String> {
        self.dispatcher
            .enqueue(&self.descriptor.name, args, kwargs, options)
            .await
    }

    pub async fn invoke_sync(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> TaskqResult<Value> {
        self.dispatcher
            .invoke_sync(&self.descriptor.name, args, kwargs)
            .await
    }
}

/// 延迟绑定的分发器引用
///
/// 任务模块在分发器创建之前加载，任务体通过该句柄调用其他任务。
/// 内部只保存弱引用，避免注册表和分发器之间形成循环引用。
#[derive(Clone, Default)]
pub struct DispatcherHandle {
    inner: Arc<OnceLock<Weak<Dispatcher>>>,
}

impl DispatcherHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, dispatcher: &Arc<Dispatcher>) -> TaskqResult<()> {
        self.inner
            .set(Arc::downgrade(dispatcher))
            .map_err(|_| TaskqError::Internal("分发器已绑定".to_string()))
    }

    pub fn get(&self) -> TaskqResult<Arc<Dispatcher>> {
        self.inner
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| TaskqError::Internal("分发器尚未就绪".to_string()))
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("bound", &self.inner.get().is_some())
            .finish()
    }
}
