use std::time::Duration;

use taskq_core::traits::TaskError;

/// 任务重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 未指定延迟时的默认重试间隔
    pub default_delay: Duration,
    /// 是否启用指数退避
    pub backoff: bool,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 最大重试间隔
    pub max_delay: Duration,
    /// 是否添加随机抖动
    pub jitter: bool,
    /// 未处理异常是否自动重试
    pub autoretry: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_delay: Duration::from_secs(180), // 3分钟
            backoff: false,
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(600), // 10分钟
            jitter: false,
            autoretry: false,
        }
    }
}

/// 任务失败后的处理决定
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 延迟后重新入队
    Retry { delay: Duration, reason: String },
    /// 已达到最大重试次数
    Exhausted { max_retries: u32, reason: String },
    /// 不重试的失败
    Fail { message: String },
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff = true;
        self.backoff_multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn with_autoretry(mut self) -> Self {
        self.autoretry = true;
        self
    }

    /// 计算第 `retry_count` 次失败后的重试间隔
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if !self.backoff {
            return self.default_delay;
        }

        let base_interval = self.default_delay.as_secs_f64();
        let max_interval = self.max_delay.as_secs_f64();

        // 计算指数退避间隔
        let exponential_interval =
            base_interval * self.backoff_multiplier.powi(retry_count.min(i32::MAX as u32) as i32);

        // 限制最大间隔
        let capped_interval = exponential_interval.min(max_interval);

        let final_interval = if self.jitter {
            // 在 [0, capped] 内取随机值，避免同时重试
            capped_interval * rand::random::<f64>()
        } else {
            capped_interval
        };

        Duration::from_secs_f64(final_interval.max(0.0))
    }

    /// 根据处理器返回的错误决定是否重试
    ///
    /// `retry_count` 为本次执行之前已执行过的次数。
    pub fn decide(&self, retry_count: u32, error: &TaskError) -> RetryDecision {
        match error {
            TaskError::Retry {
                delay,
                max_retries,
                reason,
            } => {
                let max_retries = max_retries.unwrap_or(self.max_retries);
                if retry_count < max_retries {
                    RetryDecision::Retry {
                        delay: delay.unwrap_or_else(|| self.delay_for(retry_count)),
                        reason: reason.clone(),
                    }
                } else {
                    RetryDecision::Exhausted {
                        max_retries,
                        reason: reason.clone(),
                    }
                }
            }
            TaskError::Fault(message) if self.autoretry => {
                if retry_count < self.max_retries {
                    RetryDecision::Retry {
                        delay: self.delay_for(retry_count),
                        reason: message.clone(),
                    }
                } else {
                    RetryDecision::Exhausted {
                        max_retries: self.max_retries,
                        reason: message.clone(),
                    }
                }
            }
            TaskError::Fault(message) => RetryDecision::Fail {
                message: message.clone(),
            },
        }
    }
}
