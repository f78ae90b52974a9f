//! ping/pong 示例任务
//!
//! `ping` 同步调用 `pong` 和 `PongTask`，再把它们各异步投递 20 次。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use taskq_core::traits::{TaskContext, TaskError, TaskHandler};
use taskq_core::{TaskqError, TaskqResult};
use taskq_dispatcher::{
    DispatcherHandle, EnqueueOptions, FnTask, ModuleContext, Task, TaskDefinition,
};

use super::{arg_or_kwarg, display_arg};

/// 模拟耗时操作
const SIMULATED_WORK: Duration = Duration::from_secs(2);

/// `ping` 每次投递的 pong 数量
pub const FAN_OUT: i64 = 20;

pub fn load(ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
    let pong_name = ctx.task_name_with("pong");
    let pong_task_name = ctx.task_name_with("PongTask");

    let handle = ctx.dispatcher.clone();
    let targets = (pong_name.clone(), pong_task_name);
    let ping = FnTask::new(ctx.task_name()).handler(move |_ctx, _args, _kwargs| {
        let handle = handle.clone();
        let (pong, pong_task) = targets.clone();
        async move { ping(&handle, &pong, &pong_task).await }
    });

    let pong = FnTask::new(pong_name).handler(|_ctx, args, kwargs| async move {
        let num = display_arg(arg_or_kwarg(&args, &kwargs, 0, "num").or(Some(&json!(0))));
        info!("pong task {} start...", num);
        tokio::time::sleep(SIMULATED_WORK).await;
        info!("pong task {} finished.", num);
        Ok(json!(format!("pong task {num} finished.")))
    });

    Ok(vec![
        ping,
        pong,
        TaskDefinition::from_task(PongTask::new(ctx)),
    ])
}

fn to_task_error(err: TaskqError) -> TaskError {
    if err.is_retryable() {
        TaskError::retry(err.to_string())
    } else {
        TaskError::fault(err.to_string())
    }
}

async fn ping(handle: &DispatcherHandle, pong: &str, pong_task: &str) -> Result<Value, TaskError> {
    warn!("ping task start...");
    warn!("ping task finished.");

    let dispatcher = handle.get().map_err(to_task_error)?;

    info!("{}", "=".repeat(20));
    let result = dispatcher
        .invoke_sync(pong, Vec::new(), Map::new())
        .await
        .map_err(to_task_error)?;
    info!("{}", display_arg(Some(&result)));
    let result = dispatcher
        .invoke_sync(pong_task, vec![json!(5555)], Map::new())
        .await
        .map_err(to_task_error)?;
    info!("{}", display_arg(Some(&result)));

    for i in 0..FAN_OUT {
        for name in [pong, pong_task] {
            dispatcher
                .enqueue(name, vec![json!(i)], Map::new(), EnqueueOptions::default())
                .await
                .map_err(to_task_error)?;
        }
    }
    info!("{}", "-".repeat(20));

    Ok(json!("ping task finished."))
}

pub struct PongTask {
    name: String,
}

impl PongTask {
    pub fn new(ctx: &ModuleContext) -> Self {
        Self {
            name: ctx.task_name_with("PongTask"),
        }
    }
}

impl Task for PongTask {
    fn name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl TaskHandler for PongTask {
    async fn handle(
        &self,
        _ctx: &TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        let ts = display_arg(arg_or_kwarg(&args, &kwargs, 0, "ts"));
        tokio::time::sleep(SIMULATED_WORK).await;
        Ok(json!(format!("PongTask {ts} finished.")))
    }
}
