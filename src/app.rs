use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use taskq_core::codec::{codec_for, Codec};
use taskq_core::config::AppConfig;
use taskq_core::traits::ResultBackend;
use taskq_dispatcher::{
    BacklogCompactor, BeatSchedule, BeatScheduler, Dispatcher, DispatcherHandle,
    LoggingInterceptor, ModuleContext, TaskModule, TaskRegistry,
};
use taskq_infrastructure::{create_result_backend, redact_url, BrokerFactory};
use taskq_worker::WorkerService;

use crate::tasks::{TASK_MODULES, TASK_ROOT};

/// 监控模式的输出间隔
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 消费队列并执行任务
    Worker,
    /// 定时投递任务，并清理积压队列中的重复任务
    Beat,
    /// 只读：定期输出已注册任务、调度表和队列长度
    Monitor,
}

impl AppMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Worker => "worker",
            AppMode::Beat => "beat",
            AppMode::Monitor => "monitor",
        }
    }
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(mode: &str) -> Result<Self> {
        match mode {
            "worker" => Ok(AppMode::Worker),
            "beat" => Ok(AppMode::Beat),
            "monitor" => Ok(AppMode::Monitor),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    dispatcher: Arc<Dispatcher>,
    schedule: BeatSchedule,
    result_backend: Option<Arc<dyn ResultBackend>>,
}

impl Application {
    /// 连接消息代理，加载全部任务模块
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        Self::with_modules(config, mode, TASK_MODULES).await
    }

    /// 使用指定的任务模块列表初始化
    pub async fn with_modules(
        config: AppConfig,
        mode: AppMode,
        modules: &[TaskModule],
    ) -> Result<Self> {
        info!("初始化应用程序，模式: {}", mode.as_str());

        info!("连接消息代理: {}", redact_url(&config.broker.url));
        let broker = BrokerFactory::create(&config.broker.url)
            .await
            .context("创建消息代理失败")?;
        let codec: Arc<dyn Codec> =
            Arc::from(codec_for(&config.app.task_serializer).context("创建序列化器失败")?);

        let result_backend = create_result_backend(
            &config.app.result_backend,
            Duration::from_secs(config.app.result_expires_seconds),
        )
        .await
        .context("创建结果存储失败")?;

        let handle = DispatcherHandle::new();
        let module_ctx = ModuleContext::new(config.app.name.clone(), handle.clone()).with_queues(
            config.default_queue(),
            config.broker.fetch_queue.clone(),
            config.broker.notify_queue.clone(),
        );

        let mut registry = TaskRegistry::new();
        registry
            .discover(TASK_ROOT, modules, &module_ctx)
            .context("加载任务模块失败")?;
        let schedule = registry.take_schedule();

        let dispatcher = Arc::new(
            Dispatcher::new(
                Arc::new(registry),
                broker,
                codec,
                config.default_queue(),
            )
            .with_interceptor(Arc::new(LoggingInterceptor::new())),
        );
        handle.bind(&dispatcher).context("绑定分发器失败")?;

        Ok(Self {
            config,
            mode,
            dispatcher,
            schedule,
            result_backend,
        })
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn schedule(&self) -> &BeatSchedule {
        &self.schedule
    }

    /// 运行直到收到关闭信号
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {}", self.mode.as_str());

        match self.mode {
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::Beat => self.run_beat(shutdown_rx).await,
            AppMode::Monitor => self.run_monitor(shutdown_rx).await,
        }
    }

    async fn run_worker(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let worker = WorkerService::builder(Arc::clone(&self.dispatcher))
            .with_config(&self.config)
            .result_backend(self.result_backend.clone())
            .build();

        worker.run(shutdown_rx).await.context("Worker运行失败")
    }

    async fn run_beat(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let offset = self.config.app.timezone_offset()?;
        let beat = BeatScheduler::new(
            self.schedule,
            Arc::clone(&self.dispatcher),
            Duration::from_millis(self.config.beat.tick_interval_ms),
            offset,
            Utc::now(),
        )
        .context("加载定时任务失败")?;

        // 清理间隔为0时不启动重复任务清理
        let compactor_handle = match self.config.broker.compaction_interval_seconds {
            0 => {
                info!("重复任务清理已禁用");
                None
            }
            secs => {
                let compactor = BacklogCompactor::new(
                    Arc::clone(self.dispatcher.broker()),
                    Arc::clone(self.dispatcher.codec()),
                    self.config.broker.backlog_threshold,
                );
                let queues = self.config.all_queues();
                let shutdown_rx = shutdown_rx.resubscribe();
                Some(tokio::spawn(compactor.run(
                    queues,
                    Duration::from_secs(secs),
                    shutdown_rx,
                )))
            }
        };

        let result = beat.run(shutdown_rx).await;

        if let Some(handle) = compactor_handle {
            if let Err(e) = handle.await {
                warn!("重复任务清理异常退出: {}", e);
            }
        }

        result.context("Beat调度器运行失败")
    }

    async fn run_monitor(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let offset = self.config.app.timezone_offset()?;
        let beat = BeatScheduler::new(
            self.schedule.clone(),
            Arc::clone(&self.dispatcher),
            Duration::from_millis(self.config.beat.tick_interval_ms),
            offset,
            Utc::now(),
        )
        .context("加载定时任务失败")?;

        let mut report_interval = interval(MONITOR_INTERVAL);
        report_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = report_interval.tick() => self.report(&beat).await,
                _ = shutdown_rx.recv() => {
                    info!("监控收到关闭信号");
                    break;
                }
            }
        }
        Ok(())
    }

    /// 输出一次当前状态
    pub async fn report(&self, beat: &BeatScheduler) {
        let registry = self.dispatcher.registry();
        info!(
            "已注册 {} 个任务: {:?}",
            registry.len(),
            registry.task_names()
        );

        for (task, next) in beat.next_fire_times(Utc::now()) {
            match next {
                Some(next) => info!("定时任务 {} 下次触发: {}", task, next),
                None => warn!("定时任务 {} 没有下次触发时间", task),
            }
        }

        let broker = self.dispatcher.broker();
        for queue in self.config.all_queues() {
            match broker.length(&queue).await {
                Ok(length) => info!("队列 {} 长度: {}", queue, length),
                Err(e) => error!("读取队列 {} 长度失败: {}", queue, e),
            }
        }
    }
}
