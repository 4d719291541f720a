//! 日志初始化：控制台输出 + 追加写入的日志文件，支持环境变量覆盖过滤规则。

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LOG_DIR_NAME, LOG_FILE_NAME};

/// 打开 `<home>/logs/log.log`（追加模式，不存在时创建）。
pub fn open_log_file(home: &Path) -> io::Result<File> {
    let log_dir = home.join(LOG_DIR_NAME);
    std::fs::create_dir_all(&log_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
}

/// 初始化 tracing 日志订阅与默认过滤规则。
pub fn init_logging(log_file: File) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();
}

/// 请求处理过程中产生的日志条目。
pub enum LogEntry<'a> {
    Info(&'a str),
    Error(&'a dyn fmt::Display),
}

/// 将日志条目写入 tracing。
pub fn record(entry: LogEntry<'_>) {
    match entry {
        LogEntry::Info(message) => info!("{message}"),
        LogEntry::Error(err) => error!(error = %err, "request failed"),
    }
}
