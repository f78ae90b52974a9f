use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tracing::info;

use taskq_core::{
    errors::{TaskqError, TaskqResult},
    models::TaskState,
    traits::ResultBackend,
};

use crate::broker_factory::redact_url;

const RESULT_KEY_PREFIX: &str = "celery-task-meta-";

/// 进程内结果存储，过期的结果在读取时丢弃
pub struct MemoryResultBackend {
    results: RwLock<HashMap<String, (TaskState, Instant)>>,
    expires: Duration,
}

impl MemoryResultBackend {
    pub fn new(expires: Duration) -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
            expires,
        }
    }
}

#[async_trait]
impl ResultBackend for MemoryResultBackend {
    async fn store(&self, state: &TaskState) -> TaskqResult<()> {
        let mut results = self.results.write().await;
        results.insert(state.task_id.clone(), (state.clone(), Instant::now()));
        Ok(())
    }

    async fn get(&self, task_id: &str) -> TaskqResult<Option<TaskState>> {
        let results = self.results.read().await;
        Ok(results
            .get(task_id)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.expires)
            .map(|(state, _)| state.clone()))
    }
}

/// Redis 结果存储，键为 `celery-task-meta-{task_id}`，带过期时间
pub struct RedisResultBackend {
    manager: ConnectionManager,
    expires: Duration,
}

impl RedisResultBackend {
    pub async fn new(url: &str, expires: Duration) -> TaskqResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| TaskqError::Configuration(format!("无效的Redis地址: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| TaskqError::broker("连接Redis结果存储失败", e))?;
        info!("结果存储已连接: {}", redact_url(url));
        Ok(Self { manager, expires })
    }
}

#[async_trait]
impl ResultBackend for RedisResultBackend {
    async fn store(&self, state: &TaskState) -> TaskqResult<()> {
        let payload = serde_json::to_string(state)?;
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(format!("{RESULT_KEY_PREFIX}{}", state.task_id))
            .arg(payload);
        if self.expires.as_secs() > 0 {
            cmd.arg("EX").arg(self.expires.as_secs());
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskqError::broker("写入任务结果失败", e))?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> TaskqResult<Option<TaskState>> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(format!("{RESULT_KEY_PREFIX}{task_id}"))
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskqError::broker("读取任务结果失败", e))?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(TaskqError::from))
            .transpose()
    }
}

/// 按地址创建结果存储，地址为空表示不保存结果
pub async fn create_result_backend(
    url: &str,
    expires: Duration,
) -> TaskqResult<Option<Arc<dyn ResultBackend>>> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(None);
    }
    if url.starts_with("memory://") {
        return Ok(Some(Arc::new(MemoryResultBackend::new(expires))));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return Ok(Some(Arc::new(RedisResultBackend::new(url, expires).await?)));
    }
    Err(TaskqError::Configuration(format!(
        "不支持的结果存储地址: {}，支持: redis://, memory://",
        redact_url(url)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_backend_store_and_expire() {
        let backend = MemoryResultBackend::new(Duration::from_secs(60));
        let state = TaskState::success("id-1", "app.ping", json!("pong"), 0);
        backend.store(&state).await.unwrap();
        assert_eq!(backend.get("id-1").await.unwrap(), Some(state));
        assert_eq!(backend.get("missing").await.unwrap(), None);

        let expired = MemoryResultBackend::new(Duration::ZERO);
        expired
            .store(&TaskState::failure("id-2", "app.ping", "boom", 1))
            .await
            .unwrap();
        assert_eq!(expired.get("id-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_result_backend_by_url() {
        assert!(create_result_backend("", Duration::from_secs(1))
            .await
            .unwrap()
            .is_none());
        assert!(create_result_backend("memory://", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
        assert!(create_result_backend("mongodb://x", Duration::from_secs(1))
            .await
            .is_err());
    }
}
