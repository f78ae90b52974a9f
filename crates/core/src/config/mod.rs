//! 配置管理
//!
//! 配置分为 `app`、`broker`、`worker`、`beat`、`logging` 五个部分，来源依次为内置
//! 默认值、TOML 文件、`TASKQ__` 前缀环境变量和旧版扁平环境变量。

pub mod app_config;
pub mod sections;

pub use app_config::*;
pub use sections::*;
