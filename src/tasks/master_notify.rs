//! 定时通知任务：每分钟在通知队列上执行一次

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use taskq_core::models::{CronExpression, RecurrenceSpec, TaskSchedule};
use taskq_core::traits::{TaskContext, TaskError, TaskHandler};
use taskq_core::TaskqResult;
use taskq_dispatcher::{ModuleContext, Task, TaskDefinition};

pub struct NotifyTask {
    name: String,
    queue: String,
}

impl NotifyTask {
    pub fn new(ctx: &ModuleContext) -> Self {
        Self {
            name: ctx.task_name(),
            queue: ctx.notify_queue.clone(),
        }
    }
}

impl Task for NotifyTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn queue(&self) -> Option<String> {
        Some(self.queue.clone())
    }

    fn schedule(&self) -> Option<TaskSchedule> {
        Some(
            TaskSchedule::new(RecurrenceSpec::Cron(CronExpression::default().minute("*/1")))
                .with_queue(self.queue.clone()),
        )
    }
}

#[async_trait]
impl TaskHandler for NotifyTask {
    async fn handle(
        &self,
        ctx: &TaskContext,
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        info!(
            "NotifyTask task run id: {}, ts:{}, 重试次数: {}",
            Uuid::new_v4(),
            Utc::now().timestamp(),
            ctx.retry_count
        );
        Ok(json!(true))
    }
}

pub fn load(ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
    Ok(vec![TaskDefinition::from_task(NotifyTask::new(ctx))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskq_dispatcher::DispatcherHandle;

    #[test]
    fn test_notify_task_is_scheduled_on_notify_queue() {
        let ctx = ModuleContext::new("my_celery_mq", DispatcherHandle::new())
            .with_queues("my_celery_mq", "fetch_queue", "notify_queue")
            .for_module("tasks.master_notify");

        let definitions = load(&ctx).unwrap();
        assert_eq!(definitions.len(), 1);

        let definition = &definitions[0];
        assert_eq!(definition.name, "my_celery_mq.tasks.master_notify");
        assert_eq!(definition.queue.as_deref(), Some("notify_queue"));

        let schedule = definition.schedule.as_ref().unwrap();
        assert_eq!(schedule.queue.as_deref(), Some("notify_queue"));
        match &schedule.recurrence {
            RecurrenceSpec::Cron(expr) => assert_eq!(expr.minute, "*/1"),
            other => panic!("unexpected recurrence: {other}"),
        }
    }
}
