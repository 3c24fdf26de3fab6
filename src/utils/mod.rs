mod config;
mod logger;

pub use config::{Config, ConfigError};
pub use logger::{parse_log_level, setup_logger};

/// 获取应用程序版本
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 缩短ID用于显示
pub fn short_id(id: &crate::dht::NodeId) -> String {
    id.to_string()[..12].to_string()
}
