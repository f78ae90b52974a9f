use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use taskq_core::{
    errors::TaskqResult,
    models::QueueEntry,
    traits::{Broker, BrokerCapability},
};

/// 进程内列表消息代理
///
/// 用于单机运行和测试，语义与 Redis 列表一致。
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    queues: Arc<Mutex<HashMap<String, VecDeque<Vec<u8>>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 队列内容快照，按入队顺序
    pub async fn snapshot(&self, queue: &str) -> Vec<Vec<u8>> {
        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    fn capability(&self) -> BrokerCapability {
        BrokerCapability::HeadTail
    }

    async fn ping(&self) -> TaskqResult<()> {
        Ok(())
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default().push_back(payload);
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
        let mut queues = self.queues.lock().await;
        Ok(queues.get_mut(queue).and_then(|q| q.pop_front()))
    }

    async fn length(&self, queue: &str) -> TaskqResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map_or(0, |q| q.len()))
    }

    async fn flush(&self, queue: &str) -> TaskqResult<()> {
        let mut queues = self.queues.lock().await;
        queues.remove(queue);
        debug!("队列 {} 已清空", queue);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DocumentStore {
    next_id: u64,
    queues: HashMap<String, Vec<(u64, Vec<u8>)>>,
}

/// 进程内文档消息代理
///
/// 每条消息带自增ID，支持分页读取和按ID删除，语义与文档型存储（MongoDB、SQLite）一致。
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentBroker {
    store: Arc<Mutex<DocumentStore>>,
}

impl InMemoryDocumentBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 队列内容快照，按入队顺序
    pub async fn snapshot(&self, queue: &str) -> Vec<Vec<u8>> {
        let store = self.store.lock().await;
        store
            .queues
            .get(queue)
            .map(|q| q.iter().map(|(_, payload)| payload.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryDocumentBroker {
    fn name(&self) -> &str {
        "memory-document"
    }

    fn capability(&self) -> BrokerCapability {
        BrokerCapability::Paged
    }

    async fn ping(&self) -> TaskqResult<()> {
        Ok(())
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
        let mut store = self.store.lock().await;
        store.next_id += 1;
        let id = store.next_id;
        store
            .queues
            .entry(queue.to_string())
            .or_default()
            .push((id, payload));
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
        let mut store = self.store.lock().await;
        match store.queues.get_mut(queue) {
            Some(entries) if !entries.is_empty() => Ok(Some(entries.remove(0).1)),
            _ => Ok(None),
        }
    }

    async fn length(&self, queue: &str) -> TaskqResult<usize> {
        let store = self.store.lock().await;
        Ok(store.queues.get(queue).map_or(0, |q| q.len()))
    }

    async fn paged_read(
        &self,
        queue: &str,
        offset: usize,
        limit: usize,
    ) -> TaskqResult<Vec<QueueEntry>> {
        let store = self.store.lock().await;
        Ok(store
            .queues
            .get(queue)
            .map(|entries| {
                entries
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .map(|(id, payload)| QueueEntry::new(id.to_string(), payload.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_by_ids(&self, queue: &str, ids: &[String]) -> TaskqResult<usize> {
        let mut store = self.store.lock().await;
        let Some(entries) = store.queues.get_mut(queue) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|(id, _)| !ids.contains(&id.to_string()));
        Ok(before - entries.len())
    }

    async fn flush(&self, queue: &str) -> TaskqResult<()> {
        let mut store = self.store.lock().await;
        store.queues.remove(queue);
        Ok(())
    }
}
