use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 入队的任务消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueuedMessage {
    pub id: String,
    pub task_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub queue: String,
    pub enqueued_at: DateTime<Utc>,
    /// 该消息此前已执行的次数
    pub retry_count: u32,
    /// 最早可执行时间，None 表示立即执行
    pub eta: Option<DateTime<Utc>>,
}

impl EnqueuedMessage {
    pub fn new(task_name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            queue: queue.into(),
            enqueued_at: Utc::now(),
            retry_count: 0,
            eta: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn with_countdown(self, countdown: std::time::Duration) -> Self {
        let delay = Duration::from_std(countdown).unwrap_or_else(|_| Duration::seconds(0));
        let eta = Utc::now() + delay;
        self.with_eta(eta)
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// 检查消息是否已到执行时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.eta.map_or(true, |eta| eta <= now)
    }

    /// 生成重试消息：保留任务ID，重试次数加一，延迟 `delay` 后执行
    pub fn next_retry(&self, delay: std::time::Duration, now: DateTime<Utc>) -> Self {
        let delay = Duration::from_std(delay).unwrap_or_else(|_| Duration::seconds(0));
        Self {
            id: self.id.clone(),
            task_name: self.task_name.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            queue: self.queue.clone(),
            enqueued_at: now,
            retry_count: self.retry_count + 1,
            eta: Some(now + delay),
        }
    }

    /// 消息内容标识：任务名加参数，不包含ID、时间戳、重试次数等外层信息
    pub fn content_key(&self) -> String {
        let body = serde_json::to_string(&(&self.args, &self.kwargs)).unwrap_or_default();
        format!("{}:{}", self.task_name, body)
    }
}

/// 可分页读取的消息代理中的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: String,
    pub payload: Vec<u8>,
}

impl QueueEntry {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_content_key_ignores_envelope_metadata() {
        let a = EnqueuedMessage::new("app.ping", "default").with_args(vec![json!(1)]);
        let mut b = EnqueuedMessage::new("app.ping", "other").with_args(vec![json!(1)]);
        b.retry_count = 3;

        assert_ne!(a.id, b.id);
        assert_eq!(a.content_key(), b.content_key());

        let c = EnqueuedMessage::new("app.ping", "default").with_args(vec![json!(2)]);
        assert_ne!(a.content_key(), c.content_key());

        let d = EnqueuedMessage::new("app.pong", "default").with_args(vec![json!(1)]);
        assert_ne!(a.content_key(), d.content_key());
    }

    #[test]
    fn test_next_retry_keeps_id_and_delays() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let message = EnqueuedMessage::new("app.notify", "notify_queue");
        let retry = message.next_retry(std::time::Duration::from_secs(30), now);

        assert_eq!(retry.id, message.id);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.queue, "notify_queue");
        assert_eq!(retry.eta, Some(now + Duration::seconds(30)));
        assert!(!retry.is_due(now));
        assert!(retry.is_due(now + Duration::seconds(30)));
    }

    #[test]
    fn test_message_without_eta_is_due() {
        let message = EnqueuedMessage::new("app.ping", "default");
        assert!(message.is_due(Utc::now()));
    }
}
