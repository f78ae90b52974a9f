//! 消息编解码
//!
//! 默认的 JSON 编码沿用 Celery 协议的外层结构：参数序列化后做 base64 编码放入
//! `body`，任务ID、任务名、重试次数等元信息放在 `headers` 中。重复任务判定只看
//! `body` 解码后的内容。

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    errors::{TaskqError, TaskqResult},
    models::EnqueuedMessage,
};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// 消息编解码接口
pub trait Codec: Send + Sync {
    fn content_type(&self) -> &str;

    fn encode(&self, message: &EnqueuedMessage) -> TaskqResult<Vec<u8>>;

    fn decode(&self, payload: &[u8]) -> TaskqResult<EnqueuedMessage>;

    /// 消息内容标识：任务名加参数，与消息ID、时间戳、重试次数无关
    fn content_key(&self, payload: &[u8]) -> TaskqResult<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    headers: Headers,
    body: String,
    #[serde(rename = "content-type")]
    content_type: String,
    #[serde(rename = "content-encoding")]
    content_encoding: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Headers {
    id: String,
    task: String,
    #[serde(default)]
    queue: String,
    #[serde(default)]
    retries: u32,
    #[serde(default)]
    eta: Option<DateTime<Utc>>,
    #[serde(default)]
    enqueued_at: Option<DateTime<Utc>>,
}

/// JSON 编解码器
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    fn envelope(payload: &[u8]) -> TaskqResult<Envelope> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        if envelope.content_type != JSON_CONTENT_TYPE {
            return Err(TaskqError::Serialization(format!(
                "不支持的内容类型: {}",
                envelope.content_type
            )));
        }
        Ok(envelope)
    }

    fn decode_body(body: &str) -> TaskqResult<Vec<u8>> {
        STANDARD
            .decode(body)
            .map_err(|e| TaskqError::Serialization(format!("body 不是有效的base64: {e}")))
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn encode(&self, message: &EnqueuedMessage) -> TaskqResult<Vec<u8>> {
        let body = serde_json::to_vec(&(&message.args, &message.kwargs))?;
        let envelope = Envelope {
            headers: Headers {
                id: message.id.clone(),
                task: message.task_name.clone(),
                queue: message.queue.clone(),
                retries: message.retry_count,
                eta: message.eta,
                enqueued_at: Some(message.enqueued_at),
            },
            body: STANDARD.encode(body),
            content_type: JSON_CONTENT_TYPE.to_string(),
            content_encoding: "utf-8".to_string(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(&self, payload: &[u8]) -> TaskqResult<EnqueuedMessage> {
        let envelope = Self::envelope(payload)?;
        let body = Self::decode_body(&envelope.body)?;
        let (args, kwargs): (Vec<Value>, Map<String, Value>) = serde_json::from_slice(&body)?;
        let headers = envelope.headers;

        Ok(EnqueuedMessage {
            id: headers.id,
            task_name: headers.task,
            args,
            kwargs,
            queue: headers.queue,
            enqueued_at: headers.enqueued_at.unwrap_or_else(Utc::now),
            retry_count: headers.retries,
            eta: headers.eta,
        })
    }

    fn content_key(&self, payload: &[u8]) -> TaskqResult<String> {
        let envelope = Self::envelope(payload)?;
        let body = Self::decode_body(&envelope.body)?;
        let body = String::from_utf8(body)
            .map_err(|e| TaskqError::Serialization(format!("body 不是有效的UTF-8: {e}")))?;
        Ok(format!("{}:{}", envelope.headers.task, body))
    }
}

/// 根据配置的序列化名称创建编解码器
pub fn codec_for(serializer: &str) -> TaskqResult<Box<dyn Codec>> {
    match serializer.to_ascii_lowercase().as_str() {
        "json" => Ok(Box::new(JsonCodec::new())),
        other => Err(TaskqError::Configuration(format!(
            "不支持的任务序列化方式: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_restores_message() {
        let codec = JsonCodec::new();
        let mut kwargs = Map::new();
        kwargs.insert("num".to_string(), json!(5));
        let message = EnqueuedMessage::new("my_celery_mq.tasks.ping", "default")
            .with_args(vec![json!("a")])
            .with_kwargs(kwargs)
            .with_retry_count(2);

        let payload = codec.encode(&message).unwrap();
        let decoded = codec.decode(&payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_content_key_ignores_metadata() {
        let codec = JsonCodec::new();
        let first = EnqueuedMessage::new("app.ping", "default").with_args(vec![json!(1)]);
        let second = EnqueuedMessage::new("app.ping", "default")
            .with_args(vec![json!(1)])
            .with_retry_count(4);

        let key1 = codec.content_key(&codec.encode(&first).unwrap()).unwrap();
        let key2 = codec.content_key(&codec.encode(&second).unwrap()).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1, "app.ping:[[1],{}]");
    }

    #[test]
    fn test_content_key_distinguishes_tasks() {
        let codec = JsonCodec::new();
        let pong = EnqueuedMessage::new("app.pong", "default").with_args(vec![json!(1)]);
        let pong_task = EnqueuedMessage::new("app.PongTask", "default").with_args(vec![json!(1)]);

        let key1 = codec.content_key(&codec.encode(&pong).unwrap()).unwrap();
        let key2 = codec.content_key(&codec.encode(&pong_task).unwrap()).unwrap();
        assert_ne!(key1, key2);
        assert_eq!(key1, pong.content_key());
        assert_eq!(key2, pong_task.content_key());
    }

    #[test]
    fn test_rejects_garbage() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(b"not json"),
            Err(TaskqError::Serialization(_))
        ));
        assert!(codec_for("pickle").is_err());
        assert!(codec_for("JSON").is_ok());
    }
}
