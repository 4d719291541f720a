//! 命令行参数与服务默认配置。

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const UPLOAD_ROUTE: &str = "/upload";
pub const FILES_ROUTE: &str = "/files";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const LOG_DIR_NAME: &str = "logs";
pub const LOG_FILE_NAME: &str = "log.log";
pub const DIR_HEADER: &str = "dir";
pub const FILENAME_HEADER: &str = "filename";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const DEFAULT_PORT: u16 = 4545;
pub const DEFAULT_RATE_LIMIT: f64 = 20.0;
pub const DEFAULT_RATE_BURST: u32 = 1;
pub const DEFAULT_LIMITER_IDLE_TTL_SECS: u64 = 0;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
pub const LIMITER_PRUNE_INTERVAL_SECS: u64 = 300;

/// 服务的命令行参数与环境变量配置。
#[derive(Parser, Debug)]
#[command(name = "file-drop", version = VERSION_INFO, about = "file-drop upload server")]
pub struct Args {
    #[arg(
        short = 'H',
        long,
        env = "FILEDROP_HOME",
        default_value = ".",
        help = "Home directory holding settings.json and logs/"
    )]
    pub home: String,
    #[arg(
        short = 'b',
        long,
        env = "FILEDROP_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "FILEDROP_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "FILEDROP_RATE_LIMIT",
        default_value_t = DEFAULT_RATE_LIMIT,
        help = "Uploads per second allowed per address (0 to disable)"
    )]
    pub rate_limit: f64,
    #[arg(
        long,
        env = "FILEDROP_RATE_BURST",
        default_value_t = DEFAULT_RATE_BURST,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Token bucket capacity per address"
    )]
    pub rate_burst: u32,
    #[arg(
        long,
        env = "FILEDROP_LIMITER_IDLE_TTL_SECS",
        default_value_t = DEFAULT_LIMITER_IDLE_TTL_SECS,
        help = "Drop idle per-address limiters after this many seconds (0 to keep forever)"
    )]
    pub limiter_idle_ttl_secs: u64,
    #[arg(
        long,
        env = "FILEDROP_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "FILEDROP_UPLOAD_TIMEOUT_SECS",
        default_value_t = DEFAULT_UPLOAD_TIMEOUT_SECS,
        help = "Max seconds spent receiving one upload body (0 to disable)"
    )]
    pub upload_timeout_secs: u64,
    #[arg(
        long,
        env = "FILEDROP_STRICT_STATUS",
        help = "Answer failed uploads with 4xx/5xx instead of 200"
    )]
    pub strict_status: bool,
    #[arg(long, env = "FILEDROP_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
}
