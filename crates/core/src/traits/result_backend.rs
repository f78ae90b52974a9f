use async_trait::async_trait;

use crate::{errors::TaskqResult, models::TaskState};

/// 任务结果存储接口
#[async_trait]
pub trait ResultBackend: Send + Sync {
    /// 写入任务状态，同一任务ID的新状态覆盖旧状态
    async fn store(&self, state: &TaskState) -> TaskqResult<()>;

    /// 读取任务状态，不存在或已过期时返回 None
    async fn get(&self, task_id: &str) -> TaskqResult<Option<TaskState>>;
}
