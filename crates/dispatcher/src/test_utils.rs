#[cfg(test)]
pub mod mocks {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use taskq_core::traits::{Broker, BrokerCapability};
    use taskq_core::{TaskqError, TaskqResult};
    use taskq_infrastructure::InMemoryBroker;

    /// 可切换为不可用状态的内存消息代理
    #[derive(Debug, Clone, Default)]
    pub struct FlakyBroker {
        pub inner: InMemoryBroker,
        failing: Arc<AtomicBool>,
    }

    impl FlakyBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self, op: &str) -> TaskqResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(TaskqError::broker(op, "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        fn name(&self) -> &str {
            "flaky"
        }

        fn capability(&self) -> BrokerCapability {
            BrokerCapability::HeadTail
        }

        async fn ping(&self) -> TaskqResult<()> {
            self.check("PING")
        }

        async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
            self.check("RPUSH")?;
            self.inner.push(queue, payload).await
        }

        async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
            self.check("LPOP")?;
            self.inner.pop_head(queue).await
        }

        async fn length(&self, queue: &str) -> TaskqResult<usize> {
            self.check("LLEN")?;
            self.inner.length(queue).await
        }

        async fn flush(&self, queue: &str) -> TaskqResult<()> {
            self.check("DEL")?;
            self.inner.flush(queue).await
        }
    }

    /// 第一次弹出时模拟另一个 Worker 抢先取走队头消息
    #[derive(Debug, Clone, Default)]
    pub struct RacingBroker {
        pub inner: InMemoryBroker,
        raced: Arc<AtomicBool>,
        taken: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RacingBroker {
        pub fn new() -> Self {
            Self::default()
        }

        /// 被“另一个 Worker”取走的消息
        pub fn taken(&self) -> Vec<Vec<u8>> {
            self.taken.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Broker for RacingBroker {
        fn name(&self) -> &str {
            "racing"
        }

        fn capability(&self) -> BrokerCapability {
            BrokerCapability::HeadTail
        }

        async fn ping(&self) -> TaskqResult<()> {
            Ok(())
        }

        async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
            self.inner.push(queue, payload).await
        }

        async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                if let Some(payload) = self.inner.pop_head(queue).await? {
                    self.taken.lock().unwrap().push(payload);
                }
            }
            self.inner.pop_head(queue).await
        }

        async fn length(&self, queue: &str) -> TaskqResult<usize> {
            self.inner.length(queue).await
        }

        async fn flush(&self, queue: &str) -> TaskqResult<()> {
            self.inner.flush(queue).await
        }
    }

    /// 流式消息代理，记录 `length` 的调用次数
    #[derive(Debug, Clone, Default)]
    pub struct StreamBroker {
        pub inner: InMemoryBroker,
        length_calls: Arc<AtomicUsize>,
    }

    impl StreamBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn length_calls(&self) -> usize {
            self.length_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Broker for StreamBroker {
        fn name(&self) -> &str {
            "stream"
        }

        fn capability(&self) -> BrokerCapability {
            BrokerCapability::Stream
        }

        async fn ping(&self) -> TaskqResult<()> {
            Ok(())
        }

        async fn push(&self, queue: &str, payload: Vec<u8>) -> TaskqResult<()> {
            self.inner.push(queue, payload).await
        }

        async fn pop_head(&self, queue: &str) -> TaskqResult<Option<Vec<u8>>> {
            self.inner.pop_head(queue).await
        }

        async fn length(&self, queue: &str) -> TaskqResult<usize> {
            self.length_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.length(queue).await
        }

        async fn flush(&self, queue: &str) -> TaskqResult<()> {
            self.inner.flush(queue).await
        }
    }
}
