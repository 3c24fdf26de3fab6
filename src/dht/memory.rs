use crate::dht::{DhtEngine, DoneCallback, GetCallback, NodeId, Value, ValueFilter, ValueType, ValueTypeId};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

/// 默认每批返回的值数量
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// 存储的值及其过期时间
#[derive(Clone, Debug)]
struct StoredValue {
    value: Arc<Value>,
    expires_at: SystemTime,
}

impl StoredValue {
    fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// 进程内DHT引擎
///
/// 所有节点共享同一份存储，回调在调用线程上同步执行。
/// 用于演示程序和测试；不做路由，也不做网络传输。
pub struct MemoryDht {
    /// 每个键下的值
    values: RwLock<HashMap<NodeId, Vec<StoredValue>>>,

    /// 已声明的值类型
    types: RwLock<HashMap<ValueTypeId, ValueType>>,

    /// 每批返回的值数量
    batch_size: usize,

    /// 模拟网络不可用
    offline: AtomicBool,

    get_requests: AtomicUsize,
    put_requests: AtomicUsize,
}

impl MemoryDht {
    /// 创建新的内存DHT
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        let mut types = HashMap::new();
        let user_data = ValueType::user_data();
        types.insert(user_data.id, user_data);

        Self {
            values: RwLock::new(HashMap::new()),
            types: RwLock::new(types),
            batch_size: batch_size.max(1),
            offline: AtomicBool::new(false),
            get_requests: AtomicUsize::new(0),
            put_requests: AtomicUsize::new(0),
        }
    }

    /// 设置离线状态；离线时所有操作以失败结束
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 收到的查找请求数量
    pub fn get_requests(&self) -> usize {
        self.get_requests.load(Ordering::SeqCst)
    }

    /// 收到的发布请求数量
    pub fn put_requests(&self) -> usize {
        self.put_requests.load(Ordering::SeqCst)
    }

    /// 本地读取键下未过期的值，不经过回调
    pub fn local_values(&self, key: &NodeId) -> Vec<Arc<Value>> {
        let now = SystemTime::now();
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);

        values.get(key)
            .map(|stored| {
                stored.iter()
                    .filter(|s| !s.is_expired(now))
                    .map(|s| s.value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 清理过期数据，返回清理数量
    pub fn cleanup_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;
        for stored in values.values_mut() {
            let before = stored.len();
            stored.retain(|s| !s.is_expired(now));
            removed += before - stored.len();
        }
        values.retain(|_, stored| !stored.is_empty());

        removed
    }

    fn expiration_for(&self, type_id: ValueTypeId) -> Duration {
        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        types.get(&type_id)
            .map(|t| t.expiration)
            .unwrap_or_else(|| ValueType::user_data().expiration)
    }
}

impl Default for MemoryDht {
    fn default() -> Self {
        Self::new()
    }
}

impl DhtEngine for MemoryDht {
    fn get(&self, key: &NodeId, mut on_values: GetCallback, on_done: DoneCallback, filter: Option<ValueFilter>) {
        self.get_requests.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            debug!("Get {} failed: offline", key);
            on_done(false);
            return;
        }

        // 回调前释放锁，回调中可能再次访问DHT
        let found: Vec<Arc<Value>> = self.local_values(key)
            .into_iter()
            .filter(|v| filter.as_ref().map_or(true, |f| f(&**v)))
            .collect();

        trace!("Get {}: {} values", key, found.len());

        for batch in found.chunks(self.batch_size) {
            if !on_values(batch) {
                debug!("Get {} stopped early by caller", key);
                break;
            }
        }

        on_done(true);
    }

    fn put(&self, key: &NodeId, value: Value, on_done: DoneCallback) {
        self.put_requests.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            debug!("Put {} failed: offline", key);
            on_done(false);
            return;
        }

        let expires_at = SystemTime::now() + self.expiration_for(value.type_id);
        let value_id = value.id;

        {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            let stored = values.entry(*key).or_default();
            stored.retain(|s| s.value.id != value_id);
            stored.push(StoredValue {
                value: Arc::new(value),
                expires_at,
            });
        }

        trace!("Stored value {:016x} under {}", value_id, key);
        on_done(true);
    }

    fn register_type(&self, value_type: ValueType) {
        debug!("Registering value type {} ({})", value_type.id, value_type.name);
        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);
        types.insert(value_type.id, value_type);
    }
}
