use std::collections::HashSet;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use taskq_core::{
    errors::{TaskqError, TaskqResult},
    traits::{Broker, BrokerCapability},
};

use crate::broker_factory::redact_url;

/// RabbitMQ 消息代理
///
/// 只支持逐条获取，不支持分页读取，因此不参与重复任务清理。
pub struct AmqpBroker {
    connection: Connection,
    channel: Mutex<Channel>,
    declared: Mutex<HashSet<String>>,
}

impl AmqpBroker {
    pub async fn new(url: &str) -> TaskqResult<Self> {
        let url = normalize_amqp_url(url);
        let connection = Connection::connect(&url, ConnectionProperties::default())
            .await
            .map_err(|e| TaskqError::broker("连接RabbitMQ失败", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TaskqError::broker("创建通道失败", e))?;

        info!("成功连接到RabbitMQ: {}", redact_url(&url));

        Ok(Self {
            connection,
            channel: Mutex::new(channel),
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// 首次访问队列时声明持久化队列
    async fn ensure_queue(&self, channel: &Channel, queue: &str) -> TaskqResult<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue) {
            return Ok(());
        }

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TaskqError::broker(&format!("声明队列 {queue} 失败"), e))?;

        debug!("队列 {} 声明成功", queue);
        declared.insert(queue.to_string());
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

/// Celery 风格的 `pyamqp://`、`rpc://` 地址转换为 `amqp://`
fn normalize_amqp_url(url: &str) -> String {
    for prefix in ["pyamqp://", "rpc://"] {
        if let Some(rest) = url.strip_prefix(prefix) {
            return format!("amqp://{rest}");
        }
    }
    url.to_string()
}

#[async_trait]
impl Broker for AmqpBroker {
    fn name(&self) -> &str {
        "amqp"
    }

    fn capability(&self) -> BrokerCapability {
        BrokerCapability::Stream
    }

    async fn ping(&self) -> TaskqResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TaskqError::BrokerUnavailable(
                "RabbitMQ连接已断开".to_string(),
            ))
        }
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
        let channel = self.channel.lock().await;
        self.ensure_queue(&channel, queue).await?;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| TaskqError::broker(&format!("发布消息到队列 {queue} 失败"), e))?;

        confirm
            .await
            .map_err(|e| TaskqError::broker("消息发布确认失败", e))?;

        debug!("消息已发布到队列: {}", queue);
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
        let channel = self.channel.lock().await;
        self.ensure_queue(&channel, queue).await?;

        let delivery = channel
            .basic_get(queue, BasicGetOptions::default())
            .await
            .map_err(|e| TaskqError::broker(&format!("从队列 {queue} 获取消息失败"), e))?;

        match delivery {
            Some(delivery) => {
                channel
                    .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                    .await
                    .map_err(|e| TaskqError::broker("确认消息失败", e))?;
                Ok(Some(delivery.data.clone()))
            }
            None => Ok(None),
        }
    }

    async fn length(&self, queue: &str) -> TaskqResult<usize> {
        let channel = self.channel.lock().await;
        // 被动声明不存在的队列会导致服务端关闭通道，先确保队列存在
        self.ensure_queue(&channel, queue).await?;

        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TaskqError::broker(&format!("获取队列 {queue} 信息失败"), e))?;

        Ok(queue_info.message_count() as usize)
    }

    async fn flush(&self, queue: &str) -> TaskqResult<()> {
        let channel = self.channel.lock().await;
        channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| TaskqError::broker(&format!("清空队列 {queue} 失败"), e))?;

        debug!("队列 {} 已清空", queue);
        Ok(())
    }
}
