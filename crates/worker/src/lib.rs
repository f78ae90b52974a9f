//! 任务执行 Worker
//!
//! [`WorkerService`] 管理一组子循环，子循环从消息代理取出消息，
//! 交给 [`TaskExecutionManager`] 执行，处理超时、重试和结果存储。

pub mod components;
pub mod service;

pub use components::{ExecutionOutcome, TaskExecutionManager};
pub use service::{WorkerService, WorkerServiceBuilder};
