use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use taskq_core::codec::Codec;
use taskq_core::logging::{short_log, short_log_bytes, LOG_PARAM_LEN};
use taskq_core::traits::{Broker, BrokerCapability};
use taskq_core::TaskqResult;

/// 文档型代理每批读取的消息数
pub const PAGE_SIZE: usize = 100;

/// 积压队列的重复任务清理
///
/// 任务执行太慢时同一任务会被定时调度重复投递。队列长度达到阈值后，
/// 参数完全相同的消息只保留最早的一条，其余消息的相对顺序不变。
pub struct BacklogCompactor {
    broker: Arc<dyn Broker>,
    codec: Arc<dyn Codec>,
    threshold: usize,
}

impl BacklogCompactor {
    pub fn new(broker: Arc<dyn Broker>, codec: Arc<dyn Codec>, threshold: usize) -> Self {
        Self {
            broker,
            codec,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// 清理单个队列，返回删除的消息数
    pub async fn compact(&self, queue: &str) -> TaskqResult<usize> {
        let capability = self.broker.capability();
        if capability == BrokerCapability::Stream {
            debug!(
                "消息代理 {} 不支持重复任务清理，跳过队列 {}",
                self.broker.name(),
                queue
            );
            return Ok(0);
        }

        let total = self.broker.length(queue).await?;
        // 数量不多时认为没有积压
        if total == 0 || total < self.threshold {
            debug!("队列 {} 共 {} 条消息，未达到清理阈值 {}", queue, total, self.threshold);
            return Ok(0);
        }

        let removed = match capability {
            BrokerCapability::HeadTail => self.compact_head_tail(queue, total).await?,
            BrokerCapability::Paged => self.compact_paged(queue, total).await?,
            BrokerCapability::Stream => 0,
        };

        info!(
            "队列 {} 重复任务清理完成: 共 {} 条, 删除 {} 条",
            queue, total, removed
        );
        Ok(removed)
    }

    /// 依次弹出原有消息，不重复的放回队尾
    ///
    /// 其他 Worker 可能同时弹出消息，每次弹出前重新读取长度：队列中只剩已放回的
    /// 消息时停止，避免把放回的消息再次当作重复删除。
    async fn compact_head_tail(&self, queue: &str, total: usize) -> TaskqResult<usize> {
        let mut seen = HashSet::new();
        let mut removed = 0;
        let mut pushed_back = 0;

        for _ in 0..total {
            let length = self.broker.length(queue).await?;
            if length <= pushed_back {
                debug!(
                    "队列 {} 原有消息已处理完 (长度 {}, 已放回 {})",
                    queue, length, pushed_back
                );
                break;
            }

            let Some(payload) = self.broker.pop_head(queue).await? else {
                break;
            };

            match self.codec.content_key(&payload) {
                Ok(key) => {
                    if !seen.insert(key) {
                        warn!(
                            "删除重复任务: {}",
                            short_log_bytes(&payload, LOG_PARAM_LEN)
                        );
                        removed += 1;
                        continue;
                    }
                }
                Err(e) => warn!("无法解析的消息，原样保留: {}", e),
            }

            if let Err(e) = self.broker.push(queue, payload.clone()).await {
                error!(
                    "消息放回队列 {} 失败: {}",
                    queue,
                    short_log_bytes(&payload, LOG_PARAM_LEN)
                );
                return Err(e);
            }
            pushed_back += 1;
        }

        Ok(removed)
    }

    /// 从最后一页向前处理，删除操作不会影响尚未读取的页的偏移
    async fn compact_paged(&self, queue: &str, total: usize) -> TaskqResult<usize> {
        // 内容 -> 目前位置最靠前的消息ID
        let mut earliest: HashMap<String, String> = HashMap::new();
        let mut observed: HashSet<String> = HashSet::new();
        let mut removed = 0;

        let pages = total.div_ceil(PAGE_SIZE);
        for page_index in (0..pages).rev() {
            let entries = self
                .broker
                .paged_read(queue, page_index * PAGE_SIZE, PAGE_SIZE)
                .await?;

            let mut delete_ids = Vec::new();
            for entry in entries.into_iter().rev() {
                if !observed.insert(entry.id.clone()) {
                    continue;
                }
                let key = match self.codec.content_key(&entry.payload) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("无法解析的消息 {}，原样保留: {}", entry.id, e);
                        continue;
                    }
                };

                if let Some(later) = earliest.insert(key.clone(), entry.id.clone()) {
                    warn!("删除重复任务: {}, id={}", short_log(&key, LOG_PARAM_LEN), later);
                    delete_ids.push(later);
                }
            }

            if !delete_ids.is_empty() {
                removed += self.broker.delete_by_ids(queue, &delete_ids).await?;
            }
        }

        Ok(removed)
    }

    /// 清理所有队列，单个队列失败不影响其他队列
    pub async fn compact_all(&self, queues: &[String]) -> usize {
        let mut removed = 0;
        for queue in queues {
            match self.compact(queue).await {
                Ok(count) => removed += count,
                Err(e) => error!("队列 {} 重复任务清理失败: {}", queue, e),
            }
        }
        removed
    }

    /// 按固定间隔清理，直到收到关闭信号
    pub async fn run(
        self,
        queues: Vec<String>,
        every: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(
            "重复任务清理已启动: 队列 {:?}, 阈值 {}, 间隔 {:?}",
            queues, self.threshold, every
        );

        let mut compaction_interval = interval(every);
        compaction_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = compaction_interval.tick() => {
                    let removed = self.compact_all(&queues).await;
                    if removed > 0 {
                        info!("本轮共删除 {} 条重复任务", removed);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("重复任务清理收到关闭信号");
                    break;
                }
            }
        }
    }
}
