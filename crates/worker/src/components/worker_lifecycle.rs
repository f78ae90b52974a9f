use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use taskq_core::codec::Codec;
use taskq_core::logging::{short_log_bytes, LOG_PARAM_LEN};
use taskq_core::models::EnqueuedMessage;
use taskq_core::traits::Broker;
use taskq_core::{TaskqError, TaskqResult};

use super::TaskExecutionManager;

/// Worker 持有的延迟消息（ETA 未到）
///
/// 所有子循环共享，子循环被替换时消息不会丢失，Worker 退出时放回原队列。
#[derive(Debug, Default)]
pub struct DelayedMessages {
    messages: Mutex<Vec<EnqueuedMessage>>,
}

impl DelayedMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn hold(&self, message: EnqueuedMessage) {
        self.messages.lock().await.push(message);
    }

    /// 取出一条已到期的消息，ETA 最早的优先
    pub async fn take_due(&self, now: DateTime<Utc>) -> Option<EnqueuedMessage> {
        let mut messages = self.messages.lock().await;
        let index = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_due(now))
            .min_by_key(|(_, m)| m.eta)
            .map(|(i, _)| i)?;
        Some(messages.swap_remove(index))
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }

    pub async fn drain(&self) -> Vec<EnqueuedMessage> {
        std::mem::take(&mut *self.messages.lock().await)
    }
}

/// 子循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// 处理任务数达到上限，需要替换
    Recycled,
    /// 收到关闭信号
    Stopped,
}

/// Worker 子循环：从队列取消息并逐条执行
pub struct WorkerChild {
    pub id: usize,
    pub broker: Arc<dyn Broker>,
    pub codec: Arc<dyn Codec>,
    pub executor: Arc<TaskExecutionManager>,
    pub delayed: Arc<DelayedMessages>,
    pub queues: Vec<String>,
    pub max_tasks: Option<usize>,
    pub acks_late: bool,
    pub poll_interval: Duration,
    pub max_broker_failures: u32,
}

impl WorkerChild {
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> TaskqResult<ChildExit> {
        debug!("子循环 {} 启动", self.id);
        let mut processed = 0usize;
        let mut failures = 0u32;

        loop {
            if stop_requested(&mut shutdown_rx) {
                return Ok(ChildExit::Stopped);
            }
            if let Some(max_tasks) = self.max_tasks {
                if processed >= max_tasks {
                    info!("子循环 {} 已处理 {} 个任务，等待替换", self.id, processed);
                    return Ok(ChildExit::Recycled);
                }
            }

            let next = match self.delayed.take_due(Utc::now()).await {
                Some(message) => Some((message, None)),
                None => self
                    .fetch(&mut failures)
                    .await?
                    .map(|(message, payload)| (message, Some(payload))),
            };

            let Some((message, payload)) = next else {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown_rx.recv() => return Ok(ChildExit::Stopped),
                }
                continue;
            };

            if !message.is_due(Utc::now()) {
                debug!(
                    "任务 {} 未到执行时间 {:?}，暂存",
                    message.id, message.eta
                );
                self.delayed.hold(message).await;
                continue;
            }

            processed += 1;
            if self.acks_late {
                tokio::select! {
                    _ = self.executor.execute(message.clone()) => {}
                    _ = shutdown_rx.recv() => {
                        warn!("任务 {} 执行被关闭信号中断，放回队列", message.id);
                        self.requeue(&message, payload).await;
                        return Ok(ChildExit::Stopped);
                    }
                }
            } else {
                self.executor.execute(message).await;
            }
        }
    }

    /// 按配置顺序依次检查各队列，连续失败达到上限时返回错误
    async fn fetch(&self, failures: &mut u32) -> TaskqResult<Option<(EnqueuedMessage, Vec<u8>)>> {
        for queue in &self.queues {
            let payload = match self.broker.pop_head(queue).await {
                Ok(Some(payload)) => {
                    *failures = 0;
                    payload
                }
                Ok(None) => {
                    *failures = 0;
                    continue;
                }
                Err(e) => {
                    *failures += 1;
                    warn!(
                        "从队列 {} 取消息失败 ({}/{}): {}",
                        queue, failures, self.max_broker_failures, e
                    );
                    if *failures >= self.max_broker_failures {
                        return Err(TaskqError::BrokerUnavailable(format!(
                            "连续 {} 次无法访问消息代理 {}",
                            failures,
                            self.broker.name()
                        )));
                    }
                    return Ok(None);
                }
            };

            match self.codec.decode(&payload) {
                Ok(message) => return Ok(Some((message, payload))),
                Err(e) => {
                    error!(
                        "无法解析的消息，丢弃: {}, payload={}",
                        e,
                        short_log_bytes(&payload, LOG_PARAM_LEN)
                    );
                }
            }
        }
        Ok(None)
    }

    async fn requeue(&self, message: &EnqueuedMessage, payload: Option<Vec<u8>>) {
        let payload = match payload {
            Some(payload) => payload,
            None => match self.codec.encode(message) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("任务 {} 编码失败，无法放回队列: {}", message.id, e);
                    return;
                }
            },
        };
        if let Err(e) = self.broker.push(&message.queue, payload).await {
            error!("任务 {} 放回队列 {} 失败: {}", message.id, message.queue, e);
        }
    }
}

fn stop_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_delayed_messages_release_earliest_due_first() {
        let now = Utc::now();
        let delayed = DelayedMessages::new();
        delayed
            .hold(EnqueuedMessage::new("app.a", "q").with_eta(now + ChronoDuration::seconds(30)))
            .await;
        delayed
            .hold(EnqueuedMessage::new("app.b", "q").with_eta(now - ChronoDuration::seconds(5)))
            .await;
        delayed
            .hold(EnqueuedMessage::new("app.c", "q").with_eta(now - ChronoDuration::seconds(10)))
            .await;

        assert_eq!(delayed.take_due(now).await.unwrap().task_name, "app.c");
        assert_eq!(delayed.take_due(now).await.unwrap().task_name, "app.b");
        assert!(delayed.take_due(now).await.is_none());
        assert_eq!(delayed.len().await, 1);

        let drained = delayed.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(delayed.is_empty().await);
    }

    #[test]
    fn test_stop_requested() {
        let (tx, mut rx) = broadcast::channel(1);
        assert!(!stop_requested(&mut rx));
        tx.send(()).unwrap();
        assert!(stop_requested(&mut rx));
        drop(tx);
        assert!(stop_requested(&mut rx));
    }
}
