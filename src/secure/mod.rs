mod certificates;
mod error;
mod put;
mod verification;

pub use certificates::{CertificateCallback, CertificateStore};
pub use error::SecureDhtError;
pub use verification::check_value_signature;

use crate::crypto::{Certificate, CryptoContext, PublicKey};
use crate::dht::{DhtEngine, DoneCallback, GetCallback, NodeId, Value, ValueFilter, ValueType, CERTIFICATE_TYPE};
use crate::identity::Identity;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// SecureDht 生命周期
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active,
    ShuttingDown,
    Destroyed,
}

/// SecureDht 的配置
#[derive(Clone, Debug)]
pub struct SecureDhtConfig {
    /// 启动时是否把本地证书发布到DHT
    pub announce_certificate: bool,
}

impl Default for SecureDhtConfig {
    fn default() -> Self {
        Self {
            announce_certificate: true,
        }
    }
}

/// 在DHT之上提供签名和加密的值交换
///
/// 持有本地身份和证书缓存。查找只交付验证通过的值，
/// 发布前对值签名，或者签名后加密给指定节点。
pub struct SecureDht {
    /// 底层DHT
    engine: Arc<dyn DhtEngine>,

    /// 本地身份
    identity: Arc<Identity>,

    /// 节点证书缓存
    certificates: Arc<CertificateStore>,

    config: SecureDhtConfig,

    state: Mutex<LifecycleState>,

    /// 证书与私钥不匹配
    degraded: bool,

    /// 加密后端，随实例一起释放
    _crypto: CryptoContext,
}

impl SecureDht {
    /// 创建 SecureDht
    ///
    /// 加密后端初始化失败时返回错误。证书与私钥不匹配时记录错误并以降级模式运行，
    /// 这时不会发布本地证书。
    pub fn new(engine: Arc<dyn DhtEngine>, identity: Identity, config: SecureDhtConfig) -> Result<Self, SecureDhtError> {
        let crypto = CryptoContext::acquire()?;

        let identity = Arc::new(identity);
        let local_id = identity.id();
        let certificates = Arc::new(CertificateStore::new(
            engine.clone(),
            local_id,
            identity.certificate().clone(),
        ));

        let degraded = !identity.is_consistent();
        if degraded {
            error!(
                "Certificate {} does not match private key of {}, running degraded",
                identity.certificate().id(),
                local_id
            );
        }

        let secure = Self {
            engine,
            identity,
            certificates,
            config,
            state: Mutex::new(LifecycleState::Uninitialized),
            degraded,
            _crypto: crypto,
        };

        secure.engine.register_type(ValueType::certificate());
        secure.set_state(LifecycleState::Active);
        info!("SecureDht started for {}", local_id);

        if secure.config.announce_certificate && !secure.degraded {
            secure.announce_certificate();
        }

        Ok(secure)
    }

    /// 本地节点ID
    pub fn id(&self) -> NodeId {
        self.identity.id()
    }

    pub fn public_key(&self) -> &PublicKey {
        self.identity.public_key()
    }

    /// 本地证书
    pub fn certificate(&self) -> &Arc<Certificate> {
        self.identity.certificate()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// 停止接受新的操作，已经发出的回调照常完成
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == LifecycleState::Active {
            info!("SecureDht {} shutting down", self.identity.id());
            *state = LifecycleState::ShuttingDown;
        }
    }

    /// 把本地证书发布到本地ID下；失败只记录日志
    pub fn announce_certificate(&self) {
        let certificate = self.identity.certificate();
        let bytes = match certificate.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Can't serialize local certificate: {}", e);
                return;
            }
        };

        let local_id = self.identity.id();
        let value = Value::with_id(certificate.serial, CERTIFICATE_TYPE, bytes);

        info!("Announcing certificate for {}", local_id);
        self.engine.put(&local_id, value, Box::new(move |ok| {
            if ok {
                debug!("Certificate for {} announced", local_id);
            } else {
                warn!("Announcing certificate for {} failed", local_id);
            }
        }));
    }

    /// 只查缓存的证书
    pub fn get_certificate(&self, id: &NodeId) -> Option<Arc<Certificate>> {
        self.certificates.get_certificate(id)
    }

    /// 解析并缓存节点证书，ID不匹配时拒绝
    pub fn register_certificate(&self, id: &NodeId, bytes: &[u8]) -> Option<Arc<Certificate>> {
        self.certificates.register_certificate(id, bytes)
    }

    /// 解析节点证书，先查缓存再查DHT
    pub fn find_certificate(&self, id: &NodeId, callback: CertificateCallback) {
        self.certificates.find_certificate(id, callback);
    }

    /// 已缓存的节点证书数量
    pub fn cached_certificates(&self) -> usize {
        self.certificates.cached_count()
    }

    /// 查找 `key` 下的值，只交付明文值和验证通过的签名值、加密值
    ///
    /// `on_done` 恰好执行一次，在DHT查找结束且所有验证完成之后。
    /// 没有 `on_values` 时仍然会验证，只是不交付。
    pub fn get(
        &self,
        key: &NodeId,
        on_values: Option<GetCallback>,
        on_done: DoneCallback,
        filter: Option<ValueFilter>,
    ) {
        if let Err(e) = self.ensure_active() {
            warn!("Get {} rejected: {}", key, e);
            on_done(false);
            return;
        }

        verification::start_lookup(
            &self.engine,
            &self.identity,
            &self.certificates,
            key,
            on_values,
            on_done,
            filter,
        );
    }

    /// 查找并收集所有验证通过的值
    pub async fn get_values(&self, key: &NodeId, filter: Option<ValueFilter>) -> Result<Vec<Arc<Value>>, SecureDhtError> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();

        let collected_cb = collected.clone();
        self.get(
            key,
            Some(Box::new(move |values| {
                collected_cb.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(values.iter().cloned());
                true
            })),
            Box::new(move |ok| {
                let _ = tx.send(ok);
            }),
            filter,
        );

        if !rx.await.unwrap_or(false) {
            return Err(SecureDhtError::LookupFailed(*key));
        }

        let values = std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(values)
    }

    pub async fn find_certificate_async(&self, id: &NodeId) -> Option<Arc<Certificate>> {
        let (tx, rx) = oneshot::channel();
        self.find_certificate(id, Box::new(move |certificate| {
            let _ = tx.send(certificate);
        }));
        rx.await.unwrap_or(None)
    }

    pub async fn put_signed_async(&self, key: &NodeId, value: Value) -> Result<(), SecureDhtError> {
        let (tx, rx) = oneshot::channel();
        self.put_signed(key, value, Box::new(move |ok| {
            let _ = tx.send(ok);
        }))?;

        if rx.await.unwrap_or(false) {
            Ok(())
        } else {
            Err(SecureDhtError::PutFailed(*key))
        }
    }

    /// 与 `put_encrypted` 相同，但区分找不到证书和发布失败
    pub async fn put_encrypted_async(&self, key: &NodeId, recipient: &NodeId, value: Value) -> Result<(), SecureDhtError> {
        self.ensure_active()?;

        let certificate = self.find_certificate_async(recipient).await
            .ok_or(SecureDhtError::CertificateNotFound(*recipient))?;
        let encrypted = self.encrypt(&value, certificate.public_key())?;

        let (tx, rx) = oneshot::channel();
        self.engine.put(key, encrypted, Box::new(move |ok| {
            let _ = tx.send(ok);
        }));

        if rx.await.unwrap_or(false) {
            Ok(())
        } else {
            Err(SecureDhtError::PutFailed(*key))
        }
    }

    pub async fn verify_signed_async(&self, value: &Value) -> Result<bool, SecureDhtError> {
        let (tx, rx) = oneshot::channel();
        self.verify_signed(value, Box::new(move |valid| {
            let _ = tx.send(valid);
        }))?;
        Ok(rx.await.unwrap_or(false))
    }

    fn ensure_active(&self) -> Result<(), SecureDhtError> {
        match self.state() {
            LifecycleState::Active => Ok(()),
            state => Err(SecureDhtError::NotActive(state)),
        }
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl Drop for SecureDht {
    fn drop(&mut self) {
        self.set_state(LifecycleState::Destroyed);
        info!("SecureDht {} destroyed", self.identity.id());
    }
}
