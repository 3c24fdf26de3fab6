use crate::dht::DEFAULT_BATCH_SIZE;
use crate::secure::SecureDhtConfig;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "secure-dht";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 节点名称，用作证书名称
    pub node_name: String,

    /// 数据目录
    pub data_dir: PathBuf,

    /// 身份数据库，相对路径基于数据目录
    pub identity_db: PathBuf,

    /// 日志级别
    pub log_level: String,

    /// 新证书的有效期（天）
    pub certificate_validity_days: u64,

    /// 启动时发布本地证书
    pub announce_certificate: bool,

    /// 内存DHT每批返回的值数量
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "dhtnode".to_string(),
            data_dir: dirs::data_dir()
                .map(|dir| dir.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from("data")),
            identity_db: PathBuf::from("identity"),
            log_level: "info".to_string(),
            certificate_validity_days: 700,
            announce_certificate: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    /// 默认配置文件位置
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.json")
    }

    /// 从文件加载配置；文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn ensure_data_dir(&self) -> Result<(), ConfigError> {
        create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn identity_db_path(&self) -> PathBuf {
        if self.identity_db.is_absolute() {
            self.identity_db.clone()
        } else {
            self.data_dir.join(&self.identity_db)
        }
    }

    pub fn certificate_validity(&self) -> Duration {
        Duration::from_secs(self.certificate_validity_days * 24 * 60 * 60)
    }

    pub fn secure_dht_config(&self) -> SecureDhtConfig {
        SecureDhtConfig {
            announce_certificate: self.announce_certificate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("missing.json")).unwrap();

        assert_eq!(config.certificate_validity_days, 700);
        assert!(config.announce_certificate);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            node_name: "alice".to_string(),
            data_dir: dir.path().to_path_buf(),
            announce_certificate: false,
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.node_name, "alice");
        assert!(!loaded.secure_dht_config().announce_certificate);
        assert_eq!(loaded.identity_db_path(), dir.path().join("identity"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "node_name": "bob", "certificate_validity_days": 1 }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.node_name, "bob");
        assert_eq!(config.certificate_validity(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.log_level, "info");
    }
}
