use crate::crypto::Certificate;
use crate::dht::{DhtEngine, DoneCallback, GetCallback, NodeId, Payload, Value, ValueFilter, CERTIFICATE_TYPE};
use crate::identity::Identity;
use crate::secure::put::decrypt_value;
use crate::secure::CertificateStore;
use log::{debug, trace, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

/// 单次查找的验证上下文
struct VerificationContext {
    /// 还在等待证书和签名验证的票据
    pending: HashSet<u64>,

    next_ticket: u64,

    /// DHT查找已结束
    finished: bool,

    /// DHT查找结果
    lookup_ok: bool,

    /// 调用方要求停止接收
    stopped: bool,

    /// 等待交给调用方的批次
    queue: VecDeque<Vec<Arc<Value>>>,

    /// 某个线程正在清空队列
    delivering: bool,

    /// 完成回调，只取出一次
    on_done: Option<DoneCallback>,
}

impl VerificationContext {
    /// 满足完成条件时取出完成回调
    fn take_done(&mut self) -> Option<(DoneCallback, bool)> {
        if self.finished && self.pending.is_empty() && !self.delivering {
            self.on_done.take().map(|done| (done, self.lookup_ok))
        } else {
            None
        }
    }
}

/// 一次安全查找在各个回调之间共享的状态
///
/// 上下文锁只保护计数和交付队列，用户回调在释放上下文锁之后执行。
/// 同一时刻只有一个线程调用值回调，其他线程的交付进入队列，由它依次取走。
pub(crate) struct Lookup {
    key: NodeId,
    context: Mutex<VerificationContext>,
    on_values: Mutex<Option<GetCallback>>,
}

impl Lookup {
    fn new(key: NodeId, on_values: Option<GetCallback>, on_done: DoneCallback) -> Self {
        Self {
            key,
            context: Mutex::new(VerificationContext {
                pending: HashSet::new(),
                next_ticket: 0,
                finished: false,
                lookup_ok: false,
                stopped: false,
                queue: VecDeque::new(),
                delivering: false,
                on_done: Some(on_done),
            }),
            on_values: Mutex::new(on_values),
        }
    }

    fn context(&self) -> std::sync::MutexGuard<'_, VerificationContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 已结束或调用方已停止，之后的批次全部丢弃
    fn is_closed(&self) -> bool {
        let context = self.context();
        context.finished || context.stopped
    }

    fn is_stopped(&self) -> bool {
        self.context().stopped
    }

    /// 把已验证的值交给调用方
    ///
    /// 另一个线程（或外层的同一次调用）正在交付时，值只入队，返回后由它交付。
    fn deliver(&self, values: Vec<Arc<Value>>) {
        if values.is_empty() {
            return;
        }

        {
            let mut context = self.context();
            if context.stopped {
                return;
            }
            context.queue.push_back(values);
            if context.delivering {
                return;
            }
            context.delivering = true;
        }

        let ready = loop {
            let batch = {
                let mut context = self.context();
                match context.queue.pop_front() {
                    Some(batch) if !context.stopped => batch,
                    _ => {
                        context.queue.clear();
                        context.delivering = false;
                        break context.take_done();
                    }
                }
            };

            if !self.call_on_values(&batch) {
                debug!("Lookup {} stopped by caller", self.key);
                self.context().stopped = true;
            }
        };

        // 交付期间DHT和验证都已结束
        if let Some((done, ok)) = ready {
            debug!("Lookup {} done after delivering queued values", self.key);
            done(ok);
        }
    }

    /// 只由持有交付权的线程调用
    fn call_on_values(&self, values: &[Arc<Value>]) -> bool {
        let mut on_values = self.on_values.lock().unwrap_or_else(PoisonError::into_inner);
        match on_values.as_mut() {
            Some(callback) => callback(values),
            None => {
                trace!("Lookup {}: {} values validated, no value callback", self.key, values.len());
                true
            }
        }
    }

    fn begin_verification(&self) -> u64 {
        let mut context = self.context();
        let ticket = context.next_ticket;
        context.next_ticket += 1;
        context.pending.insert(ticket);
        ticket
    }

    fn end_verification(&self, ticket: u64) {
        let ready = {
            let mut context = self.context();
            context.pending.remove(&ticket);
            context.take_done()
        };
        if let Some((done, ok)) = ready {
            debug!("Lookup {} done after pending verifications", self.key);
            done(ok);
        }
    }

    /// DHT查找结束
    fn finish(&self, ok: bool) {
        let ready = {
            let mut context = self.context();
            context.finished = true;
            context.lookup_ok = ok;
            if !context.pending.is_empty() {
                debug!("Lookup {} finished, {} verifications pending", self.key, context.pending.len());
            }
            context.take_done()
        };
        if let Some((done, ok)) = ready {
            done(ok);
        }
    }
}

/// 签名值是否由证书的主人签发且签名有效
pub fn check_value_signature(value: &Value, certificate: &Certificate) -> bool {
    let Payload::Signed { owner, signature, .. } = &value.payload else {
        return false;
    };

    if *owner != certificate.id() {
        return false;
    }

    match value.signable_bytes(owner) {
        Ok(tbs) => certificate.public_key().check_signature(&tbs, signature),
        Err(_) => false,
    }
}

/// 发起一次安全查找
///
/// 明文值直接交付；签名值解析签发者证书后验证；加密值先用本地私钥解密，
/// 内层的签名值再按签名值处理。完成回调在DHT结束且所有验证都完成后执行一次。
pub(crate) fn start_lookup(
    engine: &Arc<dyn DhtEngine>,
    identity: &Arc<Identity>,
    certificates: &Arc<CertificateStore>,
    key: &NodeId,
    on_values: Option<GetCallback>,
    on_done: DoneCallback,
    filter: Option<ValueFilter>,
) {
    let lookup = Arc::new(Lookup::new(*key, on_values, on_done));

    let batch_lookup = lookup.clone();
    let identity = identity.clone();
    let certificates = certificates.clone();
    let done_lookup = lookup;

    engine.get(
        key,
        Box::new(move |values| process_batch(&batch_lookup, &identity, &certificates, values)),
        Box::new(move |ok| done_lookup.finish(ok)),
        filter,
    );
}

fn process_batch(
    lookup: &Arc<Lookup>,
    identity: &Identity,
    certificates: &Arc<CertificateStore>,
    values: &[Arc<Value>],
) -> bool {
    // 节点经常和数据一起发布自己的证书，顺便预热缓存
    for value in values.iter().filter(|v| v.type_id == CERTIFICATE_TYPE && !v.is_encrypted()) {
        if let Some(data) = value.data() {
            certificates.register_certificate(&lookup.key, data);
        }
    }

    if lookup.is_closed() {
        return false;
    }

    let mut plain = Vec::new();
    let mut to_verify = Vec::new();

    for value in values {
        match &value.payload {
            Payload::Plain { .. } => plain.push(value.clone()),
            Payload::Signed { .. } => to_verify.push(value.clone()),
            Payload::Encrypted { .. } => match decrypt_value(identity, value) {
                Ok(inner) if inner.is_signed() => to_verify.push(Arc::new(inner)),
                Ok(inner) => warn!("Dropping unsigned encrypted value {:016x}", inner.id),
                Err(e) => debug!("Dropping value {:016x} under {}: {}", value.id, lookup.key, e),
            },
        }
    }

    trace!("Lookup {}: {} plain, {} to verify", lookup.key, plain.len(), to_verify.len());

    lookup.deliver(plain);

    for value in to_verify {
        verify_async(lookup, certificates, value);
    }

    !lookup.is_stopped()
}

fn verify_async(lookup: &Arc<Lookup>, certificates: &Arc<CertificateStore>, value: Arc<Value>) {
    let Some(owner) = value.owner().copied() else {
        return;
    };

    let ticket = lookup.begin_verification();
    let lookup = lookup.clone();

    certificates.find_certificate(&owner, Box::new(move |certificate| {
        match certificate {
            Some(certificate) if check_value_signature(&value, &certificate) => {
                lookup.deliver(vec![value]);
            }
            Some(_) => warn!("Invalid signature on value {:016x} from {}", value.id, owner),
            None => warn!("No certificate for {}, dropping value {:016x}", owner, value.id),
        }
        lookup.end_verification(ticket);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DEFAULT_CERTIFICATE_VALIDITY;
    use crate::dht::USER_DATA_TYPE;
    use crate::secure::put::sign_value;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, DoneCallback) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_cb = calls.clone();
        (calls, Box::new(move |ok| calls_cb.lock().unwrap().push(ok)))
    }

    #[test]
    fn test_done_waits_for_pending_verifications() {
        let (calls, done) = recorder();
        let lookup = Lookup::new(NodeId::random(), None, done);

        let first = lookup.begin_verification();
        let second = lookup.begin_verification();
        lookup.finish(true);
        assert!(calls.lock().unwrap().is_empty());

        lookup.end_verification(first);
        assert!(calls.lock().unwrap().is_empty());

        lookup.end_verification(second);
        assert_eq!(*calls.lock().unwrap(), vec![true]);

        // 迟到的结束不会再次触发
        lookup.end_verification(second);
        lookup.finish(true);
        assert_eq!(*calls.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_done_passes_lookup_result() {
        let (calls, done) = recorder();
        let lookup = Lookup::new(NodeId::random(), None, done);

        lookup.finish(false);
        assert_eq!(*calls.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_stop_request_drops_later_values() {
        let (_, done) = recorder();
        let seen = Arc::new(Mutex::new(0));
        let seen_cb = seen.clone();
        let lookup = Lookup::new(NodeId::random(), Some(Box::new(move |values| {
            *seen_cb.lock().unwrap() += values.len();
            false
        })), done);

        lookup.deliver(vec![Arc::new(Value::new(USER_DATA_TYPE, vec![1]))]);
        lookup.deliver(vec![Arc::new(Value::new(USER_DATA_TYPE, vec![2]))]);

        assert_eq!(*seen.lock().unwrap(), 1);
        assert!(lookup.is_closed());
    }

    #[test]
    fn test_nested_delivery_is_queued_not_dropped() {
        let (calls, done) = recorder();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Arc<Lookup>>>> = Arc::new(Mutex::new(None));

        let seen_cb = seen.clone();
        let slot_cb = slot.clone();
        let lookup = Arc::new(Lookup::new(NodeId::random(), Some(Box::new(move |values| {
            let data = values[0].data().unwrap().to_vec();
            seen_cb.lock().unwrap().push(data.clone());
            // 第一次回调里再交付一次
            if data == vec![1] {
                let inner = slot_cb.lock().unwrap().clone().unwrap();
                inner.deliver(vec![Arc::new(Value::new(USER_DATA_TYPE, vec![2]))]);
            }
            true
        })), done));
        *slot.lock().unwrap() = Some(lookup.clone());

        let ticket = lookup.begin_verification();
        lookup.finish(true);
        lookup.deliver(vec![Arc::new(Value::new(USER_DATA_TYPE, vec![1]))]);
        assert_eq!(*seen.lock().unwrap(), vec![vec![1], vec![2]]);
        assert!(calls.lock().unwrap().is_empty());

        lookup.end_verification(ticket);
        assert_eq!(*calls.lock().unwrap(), vec![true]);
        slot.lock().unwrap().take();
    }

    #[test]
    fn test_check_value_signature() {
        let author = Identity::generate("author", DEFAULT_CERTIFICATE_VALIDITY).unwrap();
        let other = Identity::generate("other", DEFAULT_CERTIFICATE_VALIDITY).unwrap();

        let mut value = Value::new(USER_DATA_TYPE, b"signed".to_vec());
        assert!(!check_value_signature(&value, author.certificate()));

        sign_value(&author, &mut value).unwrap();
        assert!(check_value_signature(&value, author.certificate()));
        assert!(!check_value_signature(&value, other.certificate()));

        if let Payload::Signed { data, .. } = &mut value.payload {
            data.push(0);
        }
        assert!(!check_value_signature(&value, author.certificate()));
    }
}
