use async_trait::async_trait;

use crate::{
    errors::{TaskqError, TaskqResult},
    models::QueueEntry,
};

/// 消息代理支持的访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerCapability {
    /// 列表结构：从队头弹出、向队尾追加（Redis、内存）
    HeadTail,
    /// 文档结构：按偏移分页读取、按ID批量删除（MongoDB、SQLite）
    Paged,
    /// 流式投递：只能逐条获取（AMQP），不支持重复任务清理
    Stream,
}

impl std::fmt::Display for BrokerCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerCapability::HeadTail => write!(f, "head_tail"),
            BrokerCapability::Paged => write!(f, "paged"),
            BrokerCapability::Stream => write!(f, "stream"),
        }
    }
}

/// 消息代理抽象接口
///
/// 所有实现都必须支持 `push`/`pop_head`/`length`/`flush`，Worker 只依赖这四个操作。
/// 分页读取和批量删除仅 `Paged` 类型的代理实现，其余代理返回
/// [`TaskqError::UnsupportedOperation`]。
///
/// 同一队列可能被多个 Worker 并发弹出，调用方不能假设 `length` 的结果在下一次
/// 调用时仍然成立。
#[async_trait]
pub trait Broker: Send + Sync {
    /// 代理类型名称，用于日志
    fn name(&self) -> &str;

    fn capability(&self) -> BrokerCapability;

    /// 检查连接是否可用
    async fn ping(&self) -> TaskqResult<()>;

    /// 追加消息到队尾
    async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()>;

    /// 从队头弹出一条消息，队列为空时返回 None
    async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>>;

    /// 队列中待处理的消息数量，队列不存在时为 0
    async fn length(&self, queue: &str) -> TaskqResult<usize>;

    /// 按入队顺序分页读取
    async fn paged_read(
        &self,
        queue: &str,
        offset: usize,
        limit: usize,
    ) -> TaskqResult<Vec<QueueEntry>> {
        let _ = (offset, limit);
        Err(TaskqError::UnsupportedOperation(format!(
            "{} 不支持分页读取: {queue}",
            self.name()
        )))
    }

    /// 按ID删除消息，返回实际删除数量
    async fn delete_by_ids(&self, queue: &str, ids: &[String]) -> TaskqResult<usize> {
        let _ = ids;
        Err(TaskqError::UnsupportedOperation(format!(
            "{} 不支持按ID删除: {queue}",
            self.name()
        )))
    }

    /// 清空队列
    async fn flush(&self, queue: &str) -> TaskqResult<()>;
}
