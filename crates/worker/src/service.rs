use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use taskq_core::config::AppConfig;
use taskq_core::traits::ResultBackend;
use taskq_core::TaskqResult;
use taskq_dispatcher::Dispatcher;

use crate::components::{ChildExit, DelayedMessages, TaskExecutionManager, WorkerChild};

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    dispatcher: Arc<Dispatcher>,
    result_backend: Option<Arc<dyn ResultBackend>>,
    queues: Vec<String>,
    concurrency: usize,
    max_tasks_per_child: Option<usize>,
    task_time_limit: Option<Duration>,
    acks_late: bool,
    poll_interval_ms: u64,
    max_broker_failures: u32,
    hostname: String,
}

impl WorkerServiceBuilder {
    /// 创建新的构建器，默认消费分发器的默认队列
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let queues = vec![dispatcher.default_queue().to_string()];
        Self {
            dispatcher,
            result_backend: None,
            queues,
            concurrency: 4,
            max_tasks_per_child: Some(100),
            task_time_limit: None,
            acks_late: false,
            poll_interval_ms: 500,
            max_broker_failures: 10,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    /// 按应用配置设置全部参数
    pub fn with_config(self, config: &AppConfig) -> Self {
        self.queues(config.worker_queues())
            .concurrency(config.worker.concurrency)
            .max_tasks_per_child(config.max_tasks_per_child())
            .task_time_limit(config.task_time_limit())
            .acks_late(config.worker.acks_late)
            .poll_interval_ms(config.worker.poll_interval_ms)
            .max_broker_failures(config.worker.max_broker_failures)
    }

    pub fn result_backend(mut self, backend: Option<Arc<dyn ResultBackend>>) -> Self {
        self.result_backend = backend;
        self
    }

    /// 设置消费的队列，按顺序检查
    pub fn queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    /// 设置子循环数量
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// 每个子循环最多处理的任务数，None 表示不限
    pub fn max_tasks_per_child(mut self, max_tasks: Option<usize>) -> Self {
        self.max_tasks_per_child = max_tasks;
        self
    }

    /// 任务默认执行时限，任务自身设置的时限优先
    pub fn task_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.task_time_limit = limit;
        self
    }

    pub fn acks_late(mut self, acks_late: bool) -> Self {
        self.acks_late = acks_late;
        self
    }

    /// 设置轮询间隔
    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn max_broker_failures(mut self, max_failures: u32) -> Self {
        self.max_broker_failures = max_failures.max(1);
        self
    }

    /// 设置主机名
    pub fn hostname(mut self, hostname: String) -> Self {
        self.hostname = hostname;
        self
    }

    /// 构建WorkerService
    pub fn build(self) -> WorkerService {
        let executor = Arc::new(TaskExecutionManager::new(
            Arc::clone(&self.dispatcher),
            self.result_backend,
            self.task_time_limit,
        ));
        WorkerService {
            dispatcher: self.dispatcher,
            executor,
            delayed: Arc::new(DelayedMessages::new()),
            queues: self.queues,
            concurrency: self.concurrency.max(1),
            max_tasks_per_child: self.max_tasks_per_child,
            acks_late: self.acks_late,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_broker_failures: self.max_broker_failures,
            hostname: self.hostname,
        }
    }
}

/// Worker服务
///
/// 启动 `concurrency` 个子循环消费队列。子循环处理的任务数达到上限后退出，
/// 由服务启动新的子循环替换。
pub struct WorkerService {
    dispatcher: Arc<Dispatcher>,
    executor: Arc<TaskExecutionManager>,
    delayed: Arc<DelayedMessages>,
    queues: Vec<String>,
    concurrency: usize,
    max_tasks_per_child: Option<usize>,
    acks_late: bool,
    poll_interval: Duration,
    max_broker_failures: u32,
    hostname: String,
}

impl WorkerService {
    /// 创建构建器
    pub fn builder(dispatcher: Arc<Dispatcher>) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(dispatcher)
    }

    pub fn worker_name(&self) -> String {
        format!("worker@{}", self.hostname)
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn spawn_child(
        &self,
        children: &mut JoinSet<TaskqResult<ChildExit>>,
        id: usize,
        shutdown_rx: broadcast::Receiver<()>,
    ) {
        let child = WorkerChild {
            id,
            broker: Arc::clone(self.dispatcher.broker()),
            codec: Arc::clone(self.dispatcher.codec()),
            executor: Arc::clone(&self.executor),
            delayed: Arc::clone(&self.delayed),
            queues: self.queues.clone(),
            max_tasks: self.max_tasks_per_child,
            acks_late: self.acks_late,
            poll_interval: self.poll_interval,
            max_broker_failures: self.max_broker_failures,
        };
        children.spawn(child.run(shutdown_rx));
    }

    /// 运行直到收到关闭信号；消息代理不可用时返回错误
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> TaskqResult<()> {
        let broker = self.dispatcher.broker();
        broker.ping().await.map_err(|e| {
            error!("Worker启动失败，无法连接消息代理 {}: {}", broker.name(), e);
            e
        })?;

        info!(
            "启动Worker服务: {}, 消息代理={}, 队列={:?}, 并发={}, 每个子循环最多处理={:?}, acks_late={}",
            self.worker_name(),
            broker.name(),
            self.queues,
            self.concurrency,
            self.max_tasks_per_child,
            self.acks_late
        );

        let (stop_tx, _) = broadcast::channel(1);
        let mut children = JoinSet::new();
        let mut next_id = 0;
        for _ in 0..self.concurrency {
            self.spawn_child(&mut children, next_id, stop_tx.subscribe());
            next_id += 1;
        }

        let result = loop {
            tokio::select! {
                joined = children.join_next() => match joined {
                    Some(Ok(Ok(ChildExit::Recycled))) => {
                        self.spawn_child(&mut children, next_id, stop_tx.subscribe());
                        next_id += 1;
                    }
                    Some(Ok(Ok(ChildExit::Stopped))) => {}
                    Some(Ok(Err(e))) => {
                        error!("Worker子循环退出: {}", e);
                        break Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Worker子循环异常退出，重新启动: {}", e);
                        self.spawn_child(&mut children, next_id, stop_tx.subscribe());
                        next_id += 1;
                    }
                    None => break Ok(()),
                },
                _ = shutdown_rx.recv() => {
                    info!("Worker服务收到停止信号");
                    break Ok(());
                }
            }
        };

        let _ = stop_tx.send(());
        while let Some(joined) = children.join_next().await {
            match joined {
                Ok(Err(e)) => warn!("Worker子循环停止时出错: {}", e),
                Err(e) => warn!("Worker子循环停止时异常退出: {}", e),
                Ok(Ok(_)) => {}
            }
        }

        self.release_delayed().await;
        info!("Worker服务 {} 已停止", self.worker_name());
        result
    }

    /// 把未到执行时间的消息放回原队列
    async fn release_delayed(&self) {
        let messages = self.delayed.drain().await;
        if messages.is_empty() {
            return;
        }

        info!("放回 {} 条延迟任务", messages.len());
        let codec = self.dispatcher.codec();
        let broker = self.dispatcher.broker();
        for message in messages {
            let result = match codec.encode(&message) {
                Ok(payload) => broker.push(&message.queue, payload).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!("延迟任务 {} 放回队列失败: {}", message.id, e);
            }
        }
    }
}

impl std::fmt::Debug for WorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerService")
            .field("hostname", &self.hostname)
            .field("queues", &self.queues)
            .field("concurrency", &self.concurrency)
            .field("max_tasks_per_child", &self.max_tasks_per_child)
            .field("acks_late", &self.acks_late)
            .finish_non_exhaustive()
    }
}

