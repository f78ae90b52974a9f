//! # 数据模型
//!
//! 定义任务队列框架的核心数据结构：入队消息、调度规则、任务状态。
//!
//! ## 核心模型
//!
//! ### EnqueuedMessage - 入队消息
//! Dispatcher 生成、Worker 消费的任务消息。每条消息只会被一个 Worker 领取，
//! 领取的唯一性由消息代理保证。
//!
//! ### RecurrenceSpec - 调度规则
//! 固定间隔（`Interval`）或类 crontab 表达式（`Cron`），二者只能取其一。
//!
//! ### ScheduleEntry - 定时任务条目
//! Beat 调度器持有的定时任务，记录上一次触发时间 `last_fired`。
//! 进程重启后重新构建，`last_fired` 不做持久化。
//!
//! ### TaskState - 任务执行状态
//! 写入结果存储的任务状态记录。
//!
//! ## 使用示例
//!
//! ```rust
//! use taskq_core::models::{CronExpression, EnqueuedMessage, RecurrenceSpec};
//! use serde_json::json;
//!
//! let message = EnqueuedMessage::new("my_app.tasks.ping", "default")
//!     .with_args(vec![json!(1), json!("a")]);
//! assert_eq!(message.retry_count, 0);
//!
//! let every_minute = RecurrenceSpec::Cron(CronExpression::default().minute("*/1"));
//! assert!(every_minute.validate().is_ok());
//! ```

pub mod message;
pub mod schedule;
pub mod task;

pub use message::*;
pub use schedule::*;
pub use task::*;
