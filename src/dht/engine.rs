use crate::dht::{NodeId, Value, ValueFilter, ValueType};
use std::sync::Arc;

/// 值回调：每收到一批值调用一次，返回 `false` 请求提前结束查找
pub type GetCallback = Box<dyn FnMut(&[Arc<Value>]) -> bool + Send>;

/// 完成回调：参数表示底层操作是否成功
pub type DoneCallback = Box<dyn FnOnce(bool) + Send>;

/// 底层DHT引擎
///
/// 路由、传输和原始值存储都在引擎内部。所有方法注册回调后立即返回，
/// 同一次查找的回调不会并发执行。
pub trait DhtEngine: Send + Sync {
    /// 查找键下的值，按批次回调，最后调用一次完成回调
    fn get(&self, key: &NodeId, on_values: GetCallback, on_done: DoneCallback, filter: Option<ValueFilter>);

    /// 在键下发布值
    fn put(&self, key: &NodeId, value: Value, on_done: DoneCallback);

    /// 声明值类型
    fn register_type(&self, value_type: ValueType);
}
