use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 任务执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

/// 写入结果后端的任务状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retries: u32,
    pub date_done: DateTime<Utc>,
}

impl TaskState {
    pub fn new(task_id: impl Into<String>, task_name: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            task_name: task_name.into(),
            status,
            result: None,
            error: None,
            retries: 0,
            date_done: Utc::now(),
        }
    }

    pub fn success(task_id: &str, task_name: &str, result: Value, retries: u32) -> Self {
        Self {
            result: Some(result),
            retries,
            ..Self::new(task_id, task_name, TaskStatus::Success)
        }
    }

    pub fn failure(task_id: &str, task_name: &str, error: impl Into<String>, retries: u32) -> Self {
        Self {
            error: Some(error.into()),
            retries,
            ..Self::new(task_id, task_name, TaskStatus::Failure)
        }
    }

    pub fn retry(task_id: &str, task_name: &str, reason: impl Into<String>, retries: u32) -> Self {
        Self {
            error: Some(reason.into()),
            retries,
            ..Self::new(task_id, task_name, TaskStatus::Retry)
        }
    }
}
