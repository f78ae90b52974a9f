use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use taskq_core::models::{RecurrenceSpec, ScheduleEntry};
use taskq_core::TaskqResult;

use crate::cron_utils::CronScheduler;
use crate::dispatcher::{Dispatcher, EnqueueOptions};

/// 定时调度表：任务名 -> 调度项
#[derive(Debug, Clone, Default)]
pub struct BeatSchedule {
    entries: BTreeMap<String, ScheduleEntry>,
}

impl BeatSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入调度项；同名任务已存在时保留原有项并返回 false
    pub fn insert(&mut self, entry: ScheduleEntry) -> bool {
        if self.entries.contains_key(&entry.task) {
            return false;
        }
        self.entries.insert(entry.task.clone(), entry);
        true
    }

    pub fn get(&self, task: &str) -> Option<&ScheduleEntry> {
        self.entries.get(task)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.values()
    }
}

enum Trigger {
    Interval(chrono::Duration),
    Cron(CronScheduler),
}

struct ScheduledTask {
    entry: ScheduleEntry,
    trigger: Trigger,
}

/// 定时任务调度器
///
/// 每个 tick 检查所有调度项，到期的任务通过分发器入队一次。
/// 错过多个周期时只补发一次。
pub struct BeatScheduler {
    tasks: Vec<ScheduledTask>,
    dispatcher: Arc<Dispatcher>,
    tick_interval: Duration,
}

impl BeatScheduler {
    /// 构建调度器；固定间隔任务以 `start` 作为上次触发时间，首次在一个周期后触发
    pub fn new(
        schedule: BeatSchedule,
        dispatcher: Arc<Dispatcher>,
        tick_interval: Duration,
        offset: FixedOffset,
        start: DateTime<Utc>,
    ) -> TaskqResult<Self> {
        let mut tasks = Vec::with_capacity(schedule.len());

        for (_, mut entry) in schedule.entries {
            entry.recurrence.validate()?;
            let trigger = match &entry.recurrence {
                RecurrenceSpec::Interval { seconds } => {
                    if entry.last_fired.is_none() {
                        entry.last_fired = Some(start);
                    }
                    Trigger::Interval(chrono::Duration::seconds(*seconds as i64))
                }
                RecurrenceSpec::Cron(expr) => {
                    Trigger::Cron(CronScheduler::from_expression(expr, offset)?)
                }
            };
            info!("加载定时任务: {} ({})", entry.task, entry.recurrence);
            tasks.push(ScheduledTask { entry, trigger });
        }

        Ok(Self {
            tasks,
            dispatcher,
            tick_interval,
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.tasks.iter().map(|t| &t.entry)
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.tick_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(1))
    }

    fn is_due(task: &ScheduledTask, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match &task.trigger {
            Trigger::Interval(every) => task
                .entry
                .last_fired
                .map_or(true, |last| now - last >= *every),
            Trigger::Cron(cron) => cron.should_trigger(task.entry.last_fired, now, window),
        }
    }

    /// 执行一次调度检查，返回本次成功入队的任务名
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let window = self.window();
        let mut fired = Vec::new();

        for task in &mut self.tasks {
            if !Self::is_due(task, now, window) {
                continue;
            }

            let entry = &mut task.entry;
            let mut options = EnqueueOptions::new();
            options.queue = entry.queue.clone();

            match self
                .dispatcher
                .enqueue(&entry.task, entry.args.clone(), entry.kwargs.clone(), options)
                .await
            {
                Ok(message_id) => {
                    debug!(
                        "定时任务已入队: {}, message_id={}, 上次触发={:?}",
                        entry.task, message_id, entry.last_fired
                    );
                    entry.last_fired = Some(now);
                    fired.push(entry.task.clone());
                }
                Err(e) => {
                    error!("定时任务 {} 入队失败，下次检查时重试: {}", entry.task, e);
                }
            }
        }

        fired
    }

    /// 各调度项的下次触发时间
    pub fn next_fire_times(&self, now: DateTime<Utc>) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.tasks
            .iter()
            .map(|task| {
                let next = match &task.trigger {
                    Trigger::Interval(every) => {
                        Some(task.entry.last_fired.map_or(now, |last| last + *every))
                    }
                    Trigger::Cron(cron) => {
                        cron.next_execution_time(task.entry.last_fired.unwrap_or(now))
                    }
                };
                (task.entry.task.clone(), next)
            })
            .collect()
    }

    /// 按固定间隔运行，直到收到关闭信号
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> TaskqResult<()> {
        info!(
            "Beat调度器启动: {} 个定时任务, tick间隔 {:?}",
            self.tasks.len(),
            self.tick_interval
        );

        let mut tick_interval = interval(self.tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let fired = self.tick(Utc::now()).await;
                    if !fired.is_empty() {
                        info!("本次触发定时任务: {:?}", fired);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Beat调度器收到关闭信号");
                    break;
                }
            }
        }

        info!("Beat调度器已停止");
        Ok(())
    }
}
