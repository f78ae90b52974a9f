//! 内置任务模块
//!
//! 每个模块提供一个加载函数，返回该模块定义的任务。任务名约定为 `{应用名}.{模块路径}`，
//! 同一模块内的其他任务在此基础上追加后缀。新增模块时把它加入 [`TASK_MODULES`]。

use taskq_dispatcher::TaskModule;

pub mod master_notify;
pub mod test_async;

/// 任务模块根路径
pub const TASK_ROOT: &str = "tasks";

/// 全部任务模块
pub const TASK_MODULES: &[TaskModule] = &[
    TaskModule::new("tasks.master_notify", master_notify::load),
    TaskModule::new("tasks.test_async", test_async::load),
];

/// 从参数中取值：优先位置参数，其次关键字参数
pub(crate) fn arg_or_kwarg<'a>(
    args: &'a [serde_json::Value],
    kwargs: &'a serde_json::Map<String, serde_json::Value>,
    index: usize,
    key: &str,
) -> Option<&'a serde_json::Value> {
    args.get(index).or_else(|| kwargs.get(key))
}

/// 字符串参数不带引号显示，缺省为 `None`
pub(crate) fn display_arg(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => "None".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
