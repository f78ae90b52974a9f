use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use cron::Schedule;
use tracing::{debug, warn};

use taskq_core::{models::CronExpression, TaskqError, TaskqResult};

/// CRON表达式解析和调度工具
///
/// 时间点在给定时区下匹配，对外统一使用UTC时间。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    schedule: Schedule,
    offset: FixedOffset,
}

impl CronScheduler {
    /// 创建新的CRON调度器（6字段表达式，UTC时区）
    pub fn new(cron_expr: &str) -> TaskqResult<Self> {
        Self::with_offset(cron_expr, utc_offset())
    }

    pub fn with_offset(cron_expr: &str, offset: FixedOffset) -> TaskqResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| TaskqError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { schedule, offset })
    }

    /// 由分钟级 crontab 模式创建，星期字段按 0=周日 解释
    pub fn from_expression(expr: &CronExpression, offset: FixedOffset) -> TaskqResult<Self> {
        let day_of_week = translate_day_of_week(&expr.day_of_week).map_err(|message| {
            TaskqError::InvalidCron {
                expr: expr.to_cron_string(),
                message,
            }
        })?;
        let cron_expr = expr.clone().day_of_week(day_of_week).to_cron_string();
        Self::with_offset(&cron_expr, offset)
    }

    /// 检查给定时间是否应该触发任务
    ///
    /// 有上次触发时间时，上次之后的第一个匹配点不晚于 `now` 即触发，错过多个匹配点也只触发一次；
    /// 从未触发时，只有落在 `window` 内的最近匹配点才触发。
    pub fn should_trigger(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        match last_run {
            Some(last) => {
                if let Some(next_time) = self.next_execution_time(last) {
                    let should_trigger = next_time <= now;
                    if should_trigger {
                        debug!(
                            "任务应该触发: 上次执行={}, 下次执行={}, 当前时间={}",
                            last.format("%Y-%m-%d %H:%M:%S UTC"),
                            next_time.format("%Y-%m-%d %H:%M:%S UTC"),
                            now.format("%Y-%m-%d %H:%M:%S UTC")
                        );
                    }
                    should_trigger
                } else {
                    warn!(
                        "无法计算下一次执行时间，上次执行时间: {}",
                        last.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    false
                }
            }
            None => {
                let check_from = now - window;
                if let Some(next_time) = self.next_execution_time(check_from) {
                    let should_trigger = next_time <= now;
                    if should_trigger {
                        debug!(
                            "首次任务应该触发: 下次执行={}, 当前时间={}",
                            next_time.format("%Y-%m-%d %H:%M:%S UTC"),
                            now.format("%Y-%m-%d %H:%M:%S UTC")
                        );
                    }
                    should_trigger
                } else {
                    warn!("无法计算首次执行时间");
                    false
                }
            }
        }
    }

    /// 获取下一次执行时间（严格晚于 `from`）
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.offset))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.offset))
            .take(count)
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> TaskqResult<()> {
        Schedule::from_str(cron_expr).map_err(|e| TaskqError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// crontab 的星期编号为 0-6（0 为周日，7 也表示周日），cron 库为 1-7（1 为周日）。
/// 名称（MON、Tue）和 `*` 原样保留。
fn translate_day_of_week(pattern: &str) -> Result<String, String> {
    let shift = |value: &str| -> Result<String, String> {
        if value.chars().all(|c| c.is_ascii_digit()) {
            let day: u32 = value
                .parse()
                .map_err(|_| format!("无效的星期: {value}"))?;
            if day > 7 {
                return Err(format!("星期超出范围: {day}"));
            }
            Ok(((day % 7) + 1).to_string())
        } else {
            Ok(value.to_string())
        }
    };

    let mut parts = Vec::new();
    for part in pattern.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        let range = match range.split_once('-') {
            Some((start, end)) => {
                let start = shift(start)?;
                // 以 7 结尾的区间包含周日，拆成到周六的区间再加上周日
                if end == "7" {
                    format!("{start}-7,1")
                } else {
                    format!("{start}-{}", shift(end)?)
                }
            }
            None => shift(range)?,
        };
        parts.push(match step {
            Some(step) => format!("{range}/{step}"),
            None => range,
        });
    }
    Ok(parts.join(","))
}
