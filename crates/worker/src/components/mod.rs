pub mod task_execution;
pub mod worker_lifecycle;

pub use task_execution::{ExecutionOutcome, TaskExecutionManager};
pub use worker_lifecycle::{ChildExit, DelayedMessages, WorkerChild};
