//! 日志初始化与日志内容截断

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// 日志中单个参数的默认最大长度
pub const LOG_PARAM_LEN: usize = 200;

/// 截断长度的下限
pub const LOG_MIN: usize = 50;

/// 日志输出配置
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,
    /// pretty 或 json
    pub format: String,
    /// 日志文件路径，按天滚动
    pub file: Option<String>,
    /// 保留的历史日志文件数量
    pub max_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
            max_files: 30,
        }
    }
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于 `options.level`。配置了日志文件时返回的 guard 必须保持到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    match options.format.as_str() {
        "json" => layers.push(tracing_subscriber::fmt::layer().json().boxed()),
        "pretty" => layers.push(tracing_subscriber::fmt::layer().pretty().boxed()),
        other => return Err(anyhow::anyhow!("不支持的日志格式: {other}")),
    }

    let mut guard = None;
    if let Some(file) = options.file.as_deref().filter(|f| !f.is_empty()) {
        let path = Path::new(file);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("无效的日志文件路径: {file}"))?;

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("创建日志目录失败: {}", dir.display()))?;

        let appender = RollingBuilder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(file_name)
            .max_log_files(options.max_files.max(1))
            .build(&dir)
            .with_context(|| format!("创建日志文件失败: {file}"))?;
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);

        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("初始化日志系统失败")?;

    Ok(guard)
}

/// 截断过长的日志内容，保留首尾各一半，中间以 `...` 连接
pub fn short_log(value: &str, max_len: usize) -> String {
    let max_len = max_len.max(LOG_MIN);
    let total = value.chars().count();
    if total <= max_len {
        return value.to_string();
    }

    let head = max_len / 2;
    let tail = max_len - head;
    let mut result: String = value.chars().take(head).collect();
    result.push_str("...");
    result.extend(value.chars().skip(total - tail));
    result
}

/// 截断字节内容，非UTF-8字节按替换字符显示
pub fn short_log_bytes(value: &[u8], max_len: usize) -> String {
    short_log(&String::from_utf8_lossy(value), max_len)
}
