//! 任务注册、定时调度与分发
//!
//! - [`registry`]：任务模块发现与注册
//! - [`beat`]：按固定间隔或CRON模式定时入队
//! - [`dispatcher`]：异步入队与同步调用
//! - [`compactor`]：积压队列的重复任务清理

pub mod beat;
pub mod compactor;
pub mod cron_utils;
pub mod dispatcher;
pub mod interceptor;
pub mod registry;
pub mod retry_service;
pub mod task;

#[cfg(test)]
pub mod test_utils;

pub use beat::{BeatSchedule, BeatScheduler};
pub use compactor::BacklogCompactor;
pub use cron_utils::CronScheduler;
pub use dispatcher::{Dispatcher, DispatcherHandle, EnqueueOptions, TaskCaller};
pub use interceptor::{DispatchInterceptor, LoggingInterceptor};
pub use registry::{task_name, ModuleContext, TaskDescriptor, TaskModule, TaskRegistry};
pub use retry_service::{RetryDecision, RetryPolicy};
pub use task::{FnTask, Task, TaskDefinition};
