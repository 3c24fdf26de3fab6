use log::{debug, info};
use ring::rand::SecureRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Crypto backend initialization failed: {0}")]
    InitFailed(String),
}

/// 进程内加密后端的持有者数量
static ACTIVE_USERS: AtomicUsize = AtomicUsize::new(0);

/// 串行化首次初始化
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// 进程级加密后端的作用域句柄
///
/// 第一个持有者负责初始化（系统随机数自检），最后一个持有者释放时记录日志。
/// 随 `SecureDht` 一起创建和销毁。
#[derive(Debug)]
pub struct CryptoContext {
    _private: (),
}

impl CryptoContext {
    /// 获取加密后端
    pub fn acquire() -> Result<Self, CryptoError> {
        let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        if ACTIVE_USERS.load(Ordering::SeqCst) == 0 {
            self_test()?;
            info!("Crypto backend initialized");
        }

        let users = ACTIVE_USERS.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Crypto backend acquired ({} active users)", users);

        Ok(Self { _private: () })
    }

    /// 当前持有者数量
    pub fn active_users() -> usize {
        ACTIVE_USERS.load(Ordering::SeqCst)
    }
}

impl Drop for CryptoContext {
    fn drop(&mut self) {
        let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let remaining = ACTIVE_USERS.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            info!("Crypto backend released");
        } else {
            debug!("Crypto backend released ({} active users)", remaining);
        }
    }
}

/// 确认系统随机数源可用
fn self_test() -> Result<(), CryptoError> {
    let rng = ring::rand::SystemRandom::new();
    let mut probe = [0u8; 32];
    rng.fill(&mut probe)
        .map_err(|_| CryptoError::InitFailed("system random source unavailable".to_string()))?;

    if probe.iter().all(|&b| b == 0) {
        return Err(CryptoError::InitFailed("system random source returned zeroes".to_string()));
    }

    Ok(())
}
