use env_logger::{Builder, Env};
use log::LevelFilter;

/// 初始化日志；`RUST_LOG` 优先于传入的级别
///
/// 重复初始化返回错误，不会panic。
pub fn setup_logger(level: Option<LevelFilter>) -> Result<(), String> {
    let default_level = level.unwrap_or(LevelFilter::Info).to_string().to_lowercase();
    let env = Env::default().default_filter_or(default_level);

    Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| e.to_string())
}

/// 从字符串解析日志级别
pub fn parse_log_level(level_str: &str) -> Result<LevelFilter, String> {
    match level_str.to_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        _ => Err(format!("Invalid log level: {}", level_str)),
    }
}
