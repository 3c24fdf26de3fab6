use crate::crypto::Certificate;
use crate::dht::{type_filter, DhtEngine, NodeId, Value, CERTIFICATE_TYPE};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// 证书查找回调，找不到时参数为 `None`
pub type CertificateCallback = Box<dyn FnOnce(Option<Arc<Certificate>>) + Send>;

/// 节点证书缓存与解析
///
/// 缓存只增不减。同一个未缓存ID的并发查找不会合并，每次都会发起自己的DHT查找。
pub struct CertificateStore {
    /// 底层DHT
    engine: Arc<dyn DhtEngine>,

    /// 本地节点ID
    local_id: NodeId,

    /// 本地证书
    local_certificate: Arc<Certificate>,

    /// 已解析的节点证书
    certificates: RwLock<HashMap<NodeId, Arc<Certificate>>>,
}

impl CertificateStore {
    pub fn new(engine: Arc<dyn DhtEngine>, local_id: NodeId, local_certificate: Arc<Certificate>) -> Self {
        Self {
            engine,
            local_id,
            local_certificate,
            certificates: RwLock::new(HashMap::new()),
        }
    }

    /// 只查缓存；本地ID返回本地证书
    pub fn get_certificate(&self, id: &NodeId) -> Option<Arc<Certificate>> {
        if *id == self.local_id {
            return Some(self.local_certificate.clone());
        }

        let certificates = self.certificates.read().unwrap_or_else(PoisonError::into_inner);
        certificates.get(id).cloned()
    }

    /// 解析证书并在ID匹配时缓存
    ///
    /// 解析失败或ID不匹配时返回 `None`，不会缓存。
    pub fn register_certificate(&self, claimed_id: &NodeId, bytes: &[u8]) -> Option<Arc<Certificate>> {
        let certificate = match Certificate::from_bytes(bytes) {
            Ok(certificate) => certificate,
            Err(e) => {
                debug!("Ignoring certificate candidate for {}: {}", claimed_id, e);
                return None;
            }
        };

        let derived_id = certificate.id();
        if derived_id != *claimed_id {
            warn!("Certificate {} for node {} does not match node id", derived_id, claimed_id);
            return None;
        }

        let certificate = Arc::new(certificate);
        let mut certificates = self.certificates.write().unwrap_or_else(PoisonError::into_inner);
        if !certificates.contains_key(&derived_id) {
            info!("Registering certificate for {}", derived_id);
        }
        certificates.insert(derived_id, certificate.clone());

        Some(certificate)
    }

    /// 异步解析节点证书
    ///
    /// 命中缓存时立即回调；否则按证书类型查找DHT，第一个匹配的证书胜出。
    /// 回调恰好执行一次。
    pub fn find_certificate(self: &Arc<Self>, id: &NodeId, callback: CertificateCallback) {
        if let Some(certificate) = self.get_certificate(id) {
            debug!("Using certificate from cache for {}", id);
            callback(Some(certificate));
            return;
        }

        let search = Arc::new(Mutex::new(CertificateSearch::new(*id, callback)));

        let store = self.clone();
        let on_values_search = search.clone();
        let on_done_search = search;

        self.engine.get(
            id,
            Box::new(move |values| {
                // 回调在释放锁之后执行
                let (keep_going, delivery) = on_values_search.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .process(&store, values);
                if let Some((callback, certificate)) = delivery {
                    callback(certificate);
                }
                keep_going
            }),
            Box::new(move |_ok| {
                let delivery = on_done_search.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .complete();
                if let Some((callback, certificate)) = delivery {
                    callback(certificate);
                }
            }),
            Some(type_filter(CERTIFICATE_TYPE)),
        );
    }

    /// 已缓存的节点证书数量，不含本地证书
    pub fn cached_count(&self) -> usize {
        self.certificates.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// 单次证书查找的状态
enum SearchState {
    /// 还没有匹配的证书
    Searching(CertificateCallback),
    /// 已找到并交付
    Found,
    /// 找到之后仍有批次到达，全部忽略
    Draining,
}

type Delivery = (CertificateCallback, Option<Arc<Certificate>>);

struct CertificateSearch {
    id: NodeId,
    state: SearchState,
}

impl CertificateSearch {
    fn new(id: NodeId, callback: CertificateCallback) -> Self {
        Self {
            id,
            state: SearchState::Searching(callback),
        }
    }

    /// 处理一批候选值，返回是否继续查找以及待交付的结果
    fn process(&mut self, store: &CertificateStore, values: &[Arc<Value>]) -> (bool, Option<Delivery>) {
        match self.state {
            SearchState::Searching(_) => {}
            SearchState::Found | SearchState::Draining => {
                self.state = SearchState::Draining;
                return (false, None);
            }
        }

        let found = values.iter()
            .filter(|v| v.type_id == CERTIFICATE_TYPE)
            .filter_map(|v| v.data())
            .find_map(|data| store.register_certificate(&self.id, data));

        match found {
            Some(certificate) => {
                info!("Found certificate for {}", self.id);
                match std::mem::replace(&mut self.state, SearchState::Found) {
                    SearchState::Searching(callback) => (false, Some((callback, Some(certificate)))),
                    _ => (false, None),
                }
            }
            None => (true, None),
        }
    }

    /// DHT查找结束；没有找到时交付 `None`
    fn complete(&mut self) -> Option<Delivery> {
        match std::mem::replace(&mut self.state, SearchState::Draining) {
            SearchState::Searching(callback) => {
                debug!("No certificate found for {}", self.id);
                Some((callback, None))
            }
            _ => None,
        }
    }
}
