use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info};

use taskq_core::{
    errors::{TaskqError, TaskqResult},
    traits::{Broker, BrokerCapability},
};

use crate::broker_factory::redact_url;

/// Redis 列表消息代理：RPUSH 入队，LPOP 出队
pub struct RedisListBroker {
    manager: ConnectionManager,
}

impl RedisListBroker {
    pub async fn new(url: &str) -> TaskqResult<Self> {
        let client = Client::open(url)
            .map_err(|e| TaskqError::Configuration(format!("无效的Redis地址: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| TaskqError::broker("连接Redis失败", e))?;

        info!("成功连接到Redis: {}", redact_url(url));
        Ok(Self { manager })
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Broker for RedisListBroker {
    fn name(&self) -> &str {
        "redis"
    }

    fn capability(&self) -> BrokerCapability {
        BrokerCapability::HeadTail
    }

    async fn ping(&self) -> TaskqResult<()> {
        let mut conn = self.manager.clone();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskqError::broker("PING", e))?;
        if response != "PONG" {
            return Err(TaskqError::BrokerUnavailable(format!(
                "PING 返回异常: {response}"
            )));
        }
        Ok(())
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskqError::broker("RPUSH", e))?;
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let payload: Option<Vec<u8>> = redis::cmd("LPOP")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskqError::broker("LPOP", e))?;
        Ok(payload)
    }

    async fn length(&self, queue: &str) -> TaskqResult<usize> {
        let mut conn = self.manager.clone();
        let size: usize = redis::cmd("LLEN")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskqError::broker("LLEN", e))?;
        Ok(size)
    }

    async fn flush(&self, queue: &str) -> TaskqResult<()> {
        let mut conn = self.manager.clone();
        let deleted: i64 = redis::cmd("DEL")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| TaskqError::broker("DEL", e))?;
        debug!("队列 {} 已清空 (删除键数: {})", queue, deleted);
        Ok(())
    }
}
