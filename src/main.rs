use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tracing::{error, info, warn};

use taskq::app::{AppMode, Application};
use taskq::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use taskq_core::config::AppConfig;
use taskq_core::logging::{init_logging, LogOptions};

/// 收到关闭信号后等待应用退出的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("taskq")
        .version("1.0.0")
        .about("任务队列 Worker：任务执行、定时调度、重复任务清理")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，默认读取 config/taskq.toml（不存在时使用内置默认值）"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["worker", "beat", "monitor"])
                .default_value("worker"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("logfile")
                .short('f')
                .long("logfile")
                .value_name("FILE")
                .help("日志文件，默认 logs/{mode}.log"),
        )
        .arg(
            Arg::new("queues")
                .short('Q')
                .long("queues")
                .value_name("QUEUES")
                .help("Worker 消费的队列，逗号分隔")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("N")
                .help("Worker 子循环数量")
                .value_parser(clap::value_parser!(usize)),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mode_str = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("worker");
    let mode: AppMode = mode_str.parse()?;

    // 加载配置，命令行参数优先
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {}", config_path.map_or("默认配置", |p| p.as_str())))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format.clone();
    }
    if let Some(logfile) = matches.get_one::<String>("logfile") {
        config.logging.file = logfile.clone();
    }
    if let Some(queues) = matches.get_many::<String>("queues") {
        config.worker.queues = queues
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
    }
    if let Some(concurrency) = matches.get_one::<usize>("concurrency") {
        config.worker.concurrency = *concurrency;
    }
    config.validate().context("配置验证失败")?;

    // 初始化日志系统，guard 需要保持到进程退出
    let log_file = if config.logging.file.is_empty() {
        format!("logs/{}.log", mode.as_str())
    } else {
        config.logging.file.clone()
    };
    let _log_guard = init_logging(&LogOptions {
        level: config.logging.level.clone(),
        format: config.logging.format.clone(),
        file: Some(log_file.clone()),
        max_files: config.logging.max_files,
    })?;

    info!("启动任务队列 {}", config.app.name);
    info!("运行模式: {}", mode.as_str());
    info!("日志文件: {log_file}");

    let app = Application::new(config, mode).await?;

    // 创建优雅关闭管理器
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(app.run(shutdown_rx));

    // 应用提前退出（如无法连接消息代理）时不再等待信号
    let joined = tokio::select! {
        joined = &mut app_handle => Some(joined),
        _ = wait_for_shutdown_signal() => None,
    };

    let result = match joined {
        Some(joined) => joined.context("应用异常退出")?,
        None => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;

            match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
                Ok(joined) => joined.context("应用异常退出")?,
                Err(_) => {
                    warn!("应用关闭超时，强制退出");
                    Ok(())
                }
            }
        }
    };

    match &result {
        Ok(()) => info!("任务队列已退出"),
        Err(e) => error!("应用运行失败: {e:#}"),
    }
    result
}
