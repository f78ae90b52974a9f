use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{TaskqError, TaskqResult};

/// 类CRON时间模式，每个字段都是模式字符串，默认 `*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronExpression {
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month_of_year: String,
    pub day_of_week: String,
}

impl Default for CronExpression {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_month: "*".to_string(),
            month_of_year: "*".to_string(),
            day_of_week: "*".to_string(),
        }
    }
}

impl CronExpression {
    pub fn minute(mut self, pattern: impl Into<String>) -> Self {
        self.minute = pattern.into();
        self
    }

    pub fn hour(mut self, pattern: impl Into<String>) -> Self {
        self.hour = pattern.into();
        self
    }

    pub fn day_of_month(mut self, pattern: impl Into<String>) -> Self {
        self.day_of_month = pattern.into();
        self
    }

    pub fn month_of_year(mut self, pattern: impl Into<String>) -> Self {
        self.month_of_year = pattern.into();
        self
    }

    pub fn day_of_week(mut self, pattern: impl Into<String>) -> Self {
        self.day_of_week = pattern.into();
        self
    }

    /// 转换为6字段CRON表达式（秒固定为0）
    pub fn to_cron_string(&self) -> String {
        format!(
            "0 {} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }

    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("minute", &self.minute),
            ("hour", &self.hour),
            ("day_of_month", &self.day_of_month),
            ("month_of_year", &self.month_of_year),
            ("day_of_week", &self.day_of_week),
        ]
    }
}

/// 重复执行规则：固定间隔或CRON模式，二者必居其一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceSpec {
    Interval { seconds: u64 },
    Cron(CronExpression),
}

impl RecurrenceSpec {
    pub fn every(seconds: u64) -> Self {
        RecurrenceSpec::Interval { seconds }
    }

    /// 结构校验，CRON语义校验在调度器构建时完成
    pub fn validate(&self) -> TaskqResult<()> {
        match self {
            RecurrenceSpec::Interval { seconds } if *seconds == 0 => Err(
                TaskqError::InvalidSchedule("间隔秒数必须大于等于1".to_string()),
            ),
            RecurrenceSpec::Interval { .. } => Ok(()),
            RecurrenceSpec::Cron(expr) => {
                for (field, pattern) in expr.fields() {
                    if pattern.trim().is_empty() || pattern.contains(char::is_whitespace) {
                        return Err(TaskqError::InvalidCron {
                            expr: expr.to_cron_string(),
                            message: format!("字段 {field} 无效: '{pattern}'"),
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for RecurrenceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecurrenceSpec::Interval { seconds } => write!(f, "every {seconds}s"),
            RecurrenceSpec::Cron(expr) => write!(f, "cron({})", expr.to_cron_string()),
        }
    }
}

/// 任务定义上附带的调度配置，注册时被移入调度表
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSchedule {
    pub recurrence: RecurrenceSpec,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub queue: Option<String>,
}

impl TaskSchedule {
    pub fn new(recurrence: RecurrenceSpec) -> Self {
        Self {
            recurrence,
            args: Vec::new(),
            kwargs: Map::new(),
            queue: None,
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

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// 调度表中的一项
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub task: String,
    pub recurrence: RecurrenceSpec,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub queue: Option<String>,
    /// 上次成功入队时间，进程重启后不保留
    pub last_fired: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    pub fn new(task: impl Into<String>, schedule: TaskSchedule) -> Self {
        Self {
            task: task.into(),
            recurrence: schedule.recurrence,
            args: schedule.args,
            kwargs: schedule.kwargs,
            queue: schedule.queue,
            last_fired: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_expression_builder() {
        let expr = CronExpression::default().minute("*/5").hour("9-18");
        assert_eq!(expr.to_cron_string(), "0 */5 9-18 * * *");
        assert!(RecurrenceSpec::Cron(expr).validate().is_ok());
    }

    #[test]
    fn test_invalid_recurrence() {
        assert!(RecurrenceSpec::every(0).validate().is_err());
        assert!(RecurrenceSpec::every(1).validate().is_ok());

        let expr = CronExpression::default().minute("");
        assert!(matches!(
            RecurrenceSpec::Cron(expr).validate(),
            Err(TaskqError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_recurrence_serde_tagging() {
        let spec: RecurrenceSpec =
            serde_json::from_str(r#"{"type":"interval","seconds":30}"#).unwrap();
        assert_eq!(spec, RecurrenceSpec::every(30));
        assert_eq!(spec.to_string(), "every 30s");
    }
}
