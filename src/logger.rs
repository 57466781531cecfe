use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::time::UtcTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// 日志配置
pub struct LoggerConfig {
    /// 日志目录
    pub log_dir: String,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 保留的日志文件数量
    pub max_files: usize,
    /// 默认级别（未设置 RUST_LOG 时生效）
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            file_prefix: "provencal_api".to_string(),
            max_files: 7, // 保留最近一周
            level: "info".to_string(),
        }
    }
}

impl From<&LoggingConfig> for LoggerConfig {
    fn from(cfg: &LoggingConfig) -> Self {
        Self {
            log_dir: cfg.dir.clone(),
            level: cfg.level.clone(),
            ..Self::default()
        }
    }
}

impl LoggerConfig {
    /// RUST_LOG 未设置时使用的过滤规则
    pub fn default_filter(&self) -> String {
        format!("provencal_api={0},tower_http={0}", self.level)
    }
}

/// 初始化日志系统
///
/// 特性：
/// - 同时输出到控制台和文件
/// - 按日期滚动日志文件，超过 `max_files` 的旧文件自动删除
pub fn init_logger(config: &LoggerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("无法创建日志目录 {}", config.log_dir))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_files)
        .build(&config.log_dir)
        .context("无法创建日志文件")?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.default_filter().into());

    // 文件输出层（普通文本格式，便于查看）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_timer(UtcTime::rfc_3339())
        .with_ansi(false) // 文件中不使用颜色代码
        .with_target(true)
        .with_thread_ids(true);

    // 控制台输出层（人类可读格式）
    let console_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("日志系统已初始化")?;

    Ok(())
}
