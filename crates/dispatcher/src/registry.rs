use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use taskq_core::models::ScheduleEntry;
use taskq_core::traits::TaskHandler;
use taskq_core::{TaskqError, TaskqResult};

use crate::beat::BeatSchedule;
use crate::dispatcher::DispatcherHandle;
use crate::retry_service::RetryPolicy;
use crate::task::TaskDefinition;

/// 模块加载函数，返回该模块定义的全部任务
pub type ModuleLoader = fn(&ModuleContext) -> TaskqResult<Vec<TaskDefinition>>;

/// 任务模块注册表中的一项
#[derive(Clone, Copy)]
pub struct TaskModule {
    /// 点分路径，如 `tasks.master_notify`
    pub path: &'static str,
    pub load: ModuleLoader,
}

impl TaskModule {
    pub const fn new(path: &'static str, load: ModuleLoader) -> Self {
        Self { path, load }
    }
}

impl std::fmt::Debug for TaskModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskModule").field("path", &self.path).finish()
    }
}

/// 模块加载时可用的上下文
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub app_name: String,
    pub module_path: String,
    pub default_queue: String,
    pub fetch_queue: String,
    pub notify_queue: String,
    /// 任务体内调用其他任务使用
    pub dispatcher: DispatcherHandle,
}

impl ModuleContext {
    pub fn new(app_name: impl Into<String>, dispatcher: DispatcherHandle) -> Self {
        let app_name = app_name.into();
        Self {
            default_queue: app_name.clone(),
            fetch_queue: app_name.clone(),
            notify_queue: app_name.clone(),
            app_name,
            module_path: String::new(),
            dispatcher,
        }
    }

    pub fn with_queues(
        mut self,
        default_queue: impl Into<String>,
        fetch_queue: impl Into<String>,
        notify_queue: impl Into<String>,
    ) -> Self {
        self.default_queue = default_queue.into();
        self.fetch_queue = fetch_queue.into();
        self.notify_queue = notify_queue.into();
        self
    }

    pub fn for_module(&self, module_path: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            ..self.clone()
        }
    }

    /// 模块的默认任务名 `{app}.{module}`
    pub fn task_name(&self) -> String {
        task_name(&self.app_name, &self.module_path)
    }

    /// 同一模块内的附加任务名 `{app}.{module}.{suffix}`
    pub fn task_name_with(&self, suffix: &str) -> String {
        format!("{}.{}", self.task_name(), suffix)
    }
}

/// 按约定生成任务名
pub fn task_name(app_name: &str, module_path: &str) -> String {
    format!("{app_name}.{module_path}")
}

/// 已注册的任务
pub struct TaskDescriptor {
    pub name: String,
    pub queue: Option<String>,
    pub handler: Arc<dyn TaskHandler>,
    pub retry_policy: RetryPolicy,
    pub time_limit: Option<Duration>,
}

impl std::fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("retry_policy", &self.retry_policy)
            .field("time_limit", &self.time_limit)
            .finish_non_exhaustive()
    }
}

/// 任务注册表
///
/// 进程启动时构建，之后以 `Arc` 只读共享。
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskDescriptor>>,
    schedule: BeatSchedule,
    loaded_modules: HashSet<String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载 `root` 下的全部任务模块
    ///
    /// 加载失败的模块记录错误后跳过，已加载过的模块不再重复加载。
    /// 任务名重复或调度配置无效时立即返回错误，进程不应继续启动。
    pub fn discover(
        &mut self,
        root: &str,
        modules: &[TaskModule],
        ctx: &ModuleContext,
    ) -> TaskqResult<Vec<Arc<TaskDescriptor>>> {
        let mut registered = Vec::new();

        for module in modules {
            if !module_in_package(root, module.path) {
                continue;
            }
            if self.loaded_modules.contains(module.path) {
                debug!("模块 {} 已加载，跳过", module.path);
                continue;
            }

            let definitions = match (module.load)(&ctx.for_module(module.path)) {
                Ok(definitions) => definitions,
                Err(e) => {
                    let err = match e {
                        TaskqError::ImportFailure { .. } => e,
                        other => TaskqError::ImportFailure {
                            module: module.path.to_string(),
                            message: other.to_string(),
                        },
                    };
                    error!("{}", err);
                    continue;
                }
            };
            self.loaded_modules.insert(module.path.to_string());

            for definition in definitions {
                match self.register(definition) {
                    Ok(descriptor) => registered.push(descriptor),
                    Err(e) => {
                        error!("模块 {} 注册任务失败: {}", module.path, e);
                        return Err(e);
                    }
                }
            }
        }

        info!(
            "任务发现完成: root={}, 新注册 {} 个任务, 共 {} 个任务",
            root,
            registered.len(),
            self.tasks.len()
        );
        Ok(registered)
    }

    /// 注册任务；名称已存在时保留先注册的任务
    pub fn register(&mut self, mut definition: TaskDefinition) -> TaskqResult<Arc<TaskDescriptor>> {
        if self.tasks.contains_key(&definition.name) {
            return Err(TaskqError::DuplicateTaskName {
                name: definition.name,
            });
        }

        if let Some(schedule) = definition.schedule.take() {
            schedule.recurrence.validate()?;
            let entry = ScheduleEntry::new(definition.name.clone(), schedule);
            info!("任务 {} 加入定时调度: {}", entry.task, entry.recurrence);
            self.schedule.insert(entry);
        }

        let descriptor = Arc::new(TaskDescriptor {
            name: definition.name,
            queue: definition.queue,
            handler: definition.handler,
            retry_policy: definition.retry_policy,
            time_limit: definition.time_limit,
        });
        debug!("注册任务: {}", descriptor.name);
        self.tasks
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn lookup(&self, name: &str) -> TaskqResult<Arc<TaskDescriptor>> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| TaskqError::UnknownTask {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 按名称排序的任务名列表
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schedule(&self) -> &BeatSchedule {
        &self.schedule
    }

    /// 取出调度表交给调度器
    pub fn take_schedule(&mut self) -> BeatSchedule {
        std::mem::take(&mut self.schedule)
    }
}

fn module_in_package(root: &str, path: &str) -> bool {
    let rest = if root.is_empty() {
        path
    } else if path == root {
        ""
    } else {
        match path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            Some(rest) => rest,
            None => return false,
        }
    };
    !rest.split('.').any(|segment| segment.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FnTask;
    use serde_json::json;
    use taskq_core::models::{RecurrenceSpec, TaskSchedule};

    fn context() -> ModuleContext {
        ModuleContext::new("app", DispatcherHandle::new())
    }

    fn noop(name: &str) -> TaskDefinition {
        FnTask::new(name).blocking(|_ctx, _args, _kwargs| Ok(json!(null)))
    }

    fn load_notify(ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
        Ok(vec![FnTask::new(ctx.task_name())
            .queue(ctx.notify_queue.clone())
            .schedule(TaskSchedule::new(RecurrenceSpec::every(10)))
            .blocking(|_ctx, _args, _kwargs| Ok(json!(true)))])
    }

    fn load_ping(ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
        Ok(vec![noop(&ctx.task_name()), noop(&ctx.task_name_with("pong"))])
    }

    fn load_broken(ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
        Err(TaskqError::ImportFailure {
            module: ctx.module_path.clone(),
            message: "missing dependency".to_string(),
        })
    }

    const MODULES: &[TaskModule] = &[
        TaskModule::new("tasks.notify", load_notify),
        TaskModule::new("tasks.broken", load_broken),
        TaskModule::new("tasks.ping", load_ping),
        TaskModule::new("tasks._private", load_ping),
        TaskModule::new("other.ping", load_ping),
    ];

    #[test]
    fn test_register_rejects_duplicate_and_keeps_first() {
        let mut registry = TaskRegistry::new();
        let first = FnTask::new("app.a")
            .queue("first")
            .blocking(|_ctx, _args, _kwargs| Ok(json!(1)));
        let second = FnTask::new("app.a")
            .queue("second")
            .blocking(|_ctx, _args, _kwargs| Ok(json!(2)));

        registry.register(first).unwrap();
        let err = registry.register(second).unwrap_err();
        assert!(matches!(err, TaskqError::DuplicateTaskName { ref name } if name == "app.a"));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup("app.a").unwrap().queue.as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_lookup_unknown_task() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.lookup("app.missing"),
            Err(TaskqError::UnknownTask { .. })
        ));
    }

    #[test]
    fn test_discover_loads_package_and_skips_failures() {
        let mut registry = TaskRegistry::new();
        let registered = registry.discover("tasks", MODULES, &context()).unwrap();

        assert_eq!(registered.len(), 3);
        assert_eq!(
            registry.task_names(),
            vec!["app.tasks.notify", "app.tasks.ping", "app.tasks.ping.pong"]
        );
        assert!(!registry.contains("app.other.ping"));
        assert!(!registry.contains("app.tasks._private"));

        // 已加载的模块不会重复注册
        let again = registry.discover("tasks", MODULES, &context()).unwrap();
        assert!(again.is_empty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_schedule_moves_into_beat_schedule_once() {
        let mut registry = TaskRegistry::new();
        registry.discover("tasks", MODULES, &context()).unwrap();

        let schedule = registry.take_schedule();
        assert_eq!(schedule.len(), 1);
        let entry = schedule.get("app.tasks.notify").unwrap();
        assert_eq!(entry.recurrence, RecurrenceSpec::every(10));
        assert!(registry.schedule().is_empty());
    }

    #[test]
    fn test_register_rejects_invalid_schedule() {
        let mut registry = TaskRegistry::new();
        let definition = FnTask::new("app.bad")
            .schedule(TaskSchedule::new(RecurrenceSpec::every(0)))
            .blocking(|_ctx, _args, _kwargs| Ok(json!(null)));
        assert!(matches!(
            registry.register(definition),
            Err(TaskqError::InvalidSchedule(_))
        ));
        assert!(!registry.contains("app.bad"));
    }

    fn load_same_a(_ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
        Ok(vec![noop("app.same")])
    }

    fn load_same_b(_ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
        Ok(vec![noop("app.same")])
    }

    fn load_bad_schedule(ctx: &ModuleContext) -> TaskqResult<Vec<TaskDefinition>> {
        Ok(vec![FnTask::new(ctx.task_name())
            .schedule(TaskSchedule::new(RecurrenceSpec::every(0)))
            .blocking(|_ctx, _args, _kwargs| Ok(json!(null)))])
    }

    #[test]
    fn test_discover_fails_on_duplicate_task_name() {
        let modules = &[
            TaskModule::new("tasks.a", load_same_a),
            TaskModule::new("tasks.b", load_same_b),
        ];
        let mut registry = TaskRegistry::new();
        let err = registry.discover("tasks", modules, &context()).unwrap_err();
        assert!(matches!(err, TaskqError::DuplicateTaskName { ref name } if name == "app.same"));
    }

    #[test]
    fn test_discover_fails_on_invalid_schedule() {
        let modules = &[
            TaskModule::new("tasks.broken", load_broken),
            TaskModule::new("tasks.bad", load_bad_schedule),
        ];
        let mut registry = TaskRegistry::new();
        assert!(matches!(
            registry.discover("tasks", modules, &context()),
            Err(TaskqError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_module_in_package() {
        assert!(module_in_package("tasks", "tasks"));
        assert!(module_in_package("tasks", "tasks.a.b"));
        assert!(!module_in_package("tasks", "tasksx.a"));
        assert!(!module_in_package("tasks", "tasks._hidden"));
        assert!(module_in_package("", "anything"));
    }
}
