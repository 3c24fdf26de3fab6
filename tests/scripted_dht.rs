//! SecureDht against a DHT whose batches and completion signals are driven by hand.
//!
//! These tests cover the completion tracking of secure lookups and the
//! first-match-wins certificate search.

use secure_dht::crypto::DEFAULT_CERTIFICATE_VALIDITY;
use secure_dht::dht::{
    DhtEngine, DoneCallback, GetCallback, NodeId, Payload, Value, ValueFilter, ValueType, ValueTypeId,
    CERTIFICATE_TYPE, USER_DATA_TYPE,
};
use secure_dht::identity::Identity;
use secure_dht::{SecureDht, SecureDhtConfig};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

/// 一个尚未完成的查找，由测试手动推进
struct PendingGet {
    key: NodeId,
    on_values: GetCallback,
    on_done: DoneCallback,
    filter: Option<ValueFilter>,
}

impl PendingGet {
    /// 交付一批值，返回查找方是否要求继续
    fn deliver(&mut self, values: Vec<Value>) -> bool {
        let batch: Vec<Arc<Value>> = values
            .into_iter()
            .filter(|v| self.filter.as_ref().map_or(true, |f| f(v)))
            .map(Arc::new)
            .collect();
        (self.on_values)(&batch)
    }

    fn finish(self, ok: bool) {
        (self.on_done)(ok)
    }
}

#[derive(Default)]
struct ScriptedDht {
    pending: Mutex<Vec<PendingGet>>,
    requested: Mutex<Vec<NodeId>>,
    puts: Mutex<Vec<(NodeId, Value)>>,
    types: Mutex<Vec<ValueTypeId>>,
}

impl ScriptedDht {
    /// 取出 `key` 上最早的未完成查找
    fn take_get(&self, key: &NodeId) -> PendingGet {
        let mut pending = self.pending.lock().unwrap();
        let index = pending
            .iter()
            .position(|g| g.key == *key)
            .unwrap_or_else(|| panic!("no pending get for {}", key));
        pending.remove(index)
    }

    fn requests_for(&self, key: &NodeId) -> usize {
        self.requested.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    fn total_requests(&self) -> usize {
        self.requested.lock().unwrap().len()
    }

    fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

impl DhtEngine for ScriptedDht {
    fn get(&self, key: &NodeId, on_values: GetCallback, on_done: DoneCallback, filter: Option<ValueFilter>) {
        self.requested.lock().unwrap().push(*key);
        self.pending.lock().unwrap().push(PendingGet {
            key: *key,
            on_values,
            on_done,
            filter,
        });
    }

    fn put(&self, key: &NodeId, value: Value, on_done: DoneCallback) {
        self.puts.lock().unwrap().push((*key, value));
        on_done(true);
    }

    fn register_type(&self, value_type: ValueType) {
        self.types.lock().unwrap().push(value_type.id);
    }
}

fn identity(name: &str) -> Identity {
    Identity::generate(name, DEFAULT_CERTIFICATE_VALIDITY).expect("Failed to generate identity")
}

fn quiet() -> SecureDhtConfig {
    SecureDhtConfig { announce_certificate: false }
}

fn secure_node(dht: &Arc<ScriptedDht>, identity: Identity) -> SecureDht {
    SecureDht::new(dht.clone(), identity, quiet()).expect("Failed to create SecureDht")
}

/// 用于给值签名的独立节点，不接触被测DHT
fn signer(identity: &Identity) -> SecureDht {
    let dht = Arc::new(ScriptedDht::default());
    SecureDht::new(dht, identity.clone(), quiet()).expect("Failed to create signer")
}

fn certificate_value(identity: &Identity) -> Value {
    Value::new(CERTIFICATE_TYPE, identity.certificate().to_bytes().unwrap())
}

/// 记录交付的值和完成回调
#[derive(Clone, Default)]
struct Recorder {
    values: Arc<Mutex<Vec<Vec<u8>>>>,
    done: Arc<Mutex<Vec<bool>>>,
}

impl Recorder {
    fn on_values(&self) -> Option<GetCallback> {
        let values = self.values.clone();
        Some(Box::new(move |batch| {
            let mut values = values.lock().unwrap();
            values.extend(batch.iter().filter_map(|v| v.data().map(|d| d.to_vec())));
            true
        }))
    }

    fn on_done(&self) -> DoneCallback {
        let done = self.done.clone();
        Box::new(move |ok| done.lock().unwrap().push(ok))
    }

    fn values(&self) -> Vec<Vec<u8>> {
        self.values.lock().unwrap().clone()
    }

    fn done(&self) -> Vec<bool> {
        self.done.lock().unwrap().clone()
    }
}

#[test]
fn test_construction_registers_certificate_type() {
    let dht = Arc::new(ScriptedDht::default());
    let _node = SecureDht::new(dht.clone(), identity("node"), SecureDhtConfig::default()).unwrap();

    assert_eq!(*dht.types.lock().unwrap(), vec![CERTIFICATE_TYPE]);
    let puts = dht.puts.lock().unwrap();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].1.type_id, CERTIFICATE_TYPE);
}

#[test]
fn test_plain_value_needs_no_certificate() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("node"));
    let key = NodeId::hash(b"abc");
    let recorder = Recorder::default();

    node.get(&key, recorder.on_values(), recorder.on_done(), None);

    let mut lookup = dht.take_get(&key);
    assert!(lookup.deliver(vec![Value::new(USER_DATA_TYPE, b"ping".to_vec())]));
    lookup.finish(true);

    assert_eq!(recorder.values(), vec![b"ping".to_vec()]);
    assert_eq!(recorder.done(), vec![true]);
    assert_eq!(dht.total_requests(), 1);
}

#[test]
fn test_done_fires_once_after_delayed_verification() {
    let dht = Arc::new(ScriptedDht::default());
    let local = identity("local");
    let node = secure_node(&dht, local.clone());
    let alice = identity("alice");
    let key = NodeId::hash(b"abc");
    let recorder = Recorder::default();

    let mut from_alice = Value::new(USER_DATA_TYPE, b"from alice".to_vec());
    signer(&alice).sign(&mut from_alice).unwrap();

    // 本地签名后被篡改，证书本地可得，验证立即失败
    let mut tampered = Value::new(USER_DATA_TYPE, b"original".to_vec());
    node.sign(&mut tampered).unwrap();
    if let Payload::Signed { data, .. } = &mut tampered.payload {
        *data = b"tampered".to_vec();
    }

    node.get(&key, recorder.on_values(), recorder.on_done(), None);
    let mut lookup = dht.take_get(&key);

    lookup.deliver(vec![Value::new(USER_DATA_TYPE, b"plain".to_vec())]);
    lookup.deliver(vec![from_alice]);
    lookup.deliver(vec![tampered]);
    assert_eq!(recorder.values(), vec![b"plain".to_vec()]);

    // DHT先结束，签名验证还在等证书
    lookup.finish(true);
    assert!(recorder.done().is_empty());

    let mut certificate_lookup = dht.take_get(&alice.id());
    assert!(!certificate_lookup.deliver(vec![certificate_value(&alice)]));

    assert_eq!(recorder.values(), vec![b"plain".to_vec(), b"from alice".to_vec()]);
    assert_eq!(recorder.done(), vec![true]);

    certificate_lookup.finish(true);
    assert_eq!(recorder.done(), vec![true]);
}

#[test]
fn test_unverifiable_values_still_complete() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let stranger = identity("stranger");
    let key = NodeId::random();
    let recorder = Recorder::default();

    let mut value = Value::new(USER_DATA_TYPE, b"who am i".to_vec());
    signer(&stranger).sign(&mut value).unwrap();

    node.get(&key, recorder.on_values(), recorder.on_done(), None);
    let mut lookup = dht.take_get(&key);
    lookup.deliver(vec![value]);

    dht.take_get(&stranger.id()).finish(true);
    assert!(recorder.done().is_empty());

    lookup.finish(false);
    assert!(recorder.values().is_empty());
    assert_eq!(recorder.done(), vec![false]);
}

#[test]
fn test_verifications_finishing_on_separate_threads_all_deliver() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let alice = identity("alice");
    let bob = identity("bob");
    let key = NodeId::random();
    let recorder = Recorder::default();

    let mut from_alice = Value::new(USER_DATA_TYPE, b"from alice".to_vec());
    signer(&alice).sign(&mut from_alice).unwrap();
    let mut from_bob = Value::new(USER_DATA_TYPE, b"from bob".to_vec());
    signer(&bob).sign(&mut from_bob).unwrap();

    // 值回调较慢，两个验证在它执行期间同时完成
    let slow_values = recorder.on_values().map(|mut inner| -> GetCallback {
        Box::new(move |batch| {
            thread::sleep(Duration::from_millis(100));
            inner(batch)
        })
    });
    let done = recorder.done.clone();
    let delivered = recorder.values.clone();
    node.get(&key, slow_values, Box::new(move |ok| {
        // 完成时两个值都已交付
        assert_eq!(delivered.lock().unwrap().len(), 2);
        done.lock().unwrap().push(ok);
    }), None);

    let mut lookup = dht.take_get(&key);
    lookup.deliver(vec![from_alice, from_bob]);
    lookup.finish(true);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [&alice, &bob]
        .iter()
        .map(|owner| {
            let mut certificate_lookup = dht.take_get(&owner.id());
            let certificate = certificate_value(owner);
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                certificate_lookup.deliver(vec![certificate]);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut values = recorder.values();
    values.sort();
    assert_eq!(values, vec![b"from alice".to_vec(), b"from bob".to_vec()]);
    assert_eq!(recorder.done(), vec![true]);
}

#[test]
fn test_batches_after_finish_are_discarded() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let key = NodeId::random();
    let recorder = Recorder::default();

    node.get(&key, recorder.on_values(), recorder.on_done(), None);
    let mut lookup = dht.take_get(&key);

    // 完成回调消耗掉 PendingGet，这里直接调用值回调模拟迟到的批次
    let late_values = std::mem::replace(&mut lookup.on_values, Box::new(|_| true));
    lookup.finish(true);

    let mut late_values = late_values;
    let late = vec![Arc::new(Value::new(USER_DATA_TYPE, b"late".to_vec()))];
    assert!(!late_values(&late));

    assert!(recorder.values().is_empty());
    assert_eq!(recorder.done(), vec![true]);
}

#[test]
fn test_caller_can_stop_lookup() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let key = NodeId::random();
    let seen = Arc::new(Mutex::new(0));
    let done = Recorder::default();

    let seen_cb = seen.clone();
    node.get(&key, Some(Box::new(move |batch| {
        *seen_cb.lock().unwrap() += batch.len();
        false
    })), done.on_done(), None);

    let mut lookup = dht.take_get(&key);
    assert!(!lookup.deliver(vec![Value::new(USER_DATA_TYPE, vec![1])]));
    assert!(!lookup.deliver(vec![Value::new(USER_DATA_TYPE, vec![2])]));
    lookup.finish(true);

    assert_eq!(*seen.lock().unwrap(), 1);
    assert_eq!(done.done(), vec![true]);
}

#[test]
fn test_get_without_value_callback_warms_cache() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let peer = identity("peer");
    let recorder = Recorder::default();

    node.get(&peer.id(), None, recorder.on_done(), None);
    let mut lookup = dht.take_get(&peer.id());
    lookup.deliver(vec![certificate_value(&peer)]);
    lookup.finish(true);

    assert_eq!(recorder.done(), vec![true]);
    assert!(node.get_certificate(&peer.id()).is_some());
}

#[test]
fn test_encrypted_value_verified_against_inner_signer() {
    let dht = Arc::new(ScriptedDht::default());
    let local = identity("local");
    let node = secure_node(&dht, local.clone());
    let alice = identity("alice");
    let key = NodeId::random();
    let recorder = Recorder::default();

    let value = Value::new(USER_DATA_TYPE, b"for local".to_vec());
    let encrypted = signer(&alice).encrypt(&value, local.public_key()).unwrap();
    let not_for_us = signer(&alice).encrypt(&value, identity("other").public_key()).unwrap();

    node.get(&key, recorder.on_values(), recorder.on_done(), None);
    let mut lookup = dht.take_get(&key);
    lookup.deliver(vec![not_for_us, encrypted]);
    lookup.finish(true);
    assert!(recorder.done().is_empty());

    // 只有能解密的那个值触发证书查找
    assert_eq!(dht.requests_for(&alice.id()), 1);
    let mut certificate_lookup = dht.take_get(&alice.id());
    certificate_lookup.deliver(vec![certificate_value(&alice)]);

    assert_eq!(recorder.values(), vec![b"for local".to_vec()]);
    assert_eq!(recorder.done(), vec![true]);
}

#[test]
fn test_first_matching_certificate_wins() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let peer = identity("peer");
    let impostor = identity("impostor");

    let found = Arc::new(Mutex::new(Vec::new()));
    let found_cb = found.clone();
    node.find_certificate(&peer.id(), Box::new(move |certificate| {
        found_cb.lock().unwrap().push(certificate.map(|c| c.id()));
    }));

    let mut lookup = dht.take_get(&peer.id());
    let garbage = Value::new(CERTIFICATE_TYPE, b"not a certificate".to_vec());
    assert!(lookup.deliver(vec![garbage, certificate_value(&impostor)]));
    assert!(found.lock().unwrap().is_empty());

    assert!(!lookup.deliver(vec![certificate_value(&peer)]));
    assert!(!lookup.deliver(vec![certificate_value(&peer)]));
    lookup.finish(true);

    assert_eq!(*found.lock().unwrap(), vec![Some(peer.id())]);
    assert_eq!(node.cached_certificates(), 1);
    assert!(node.get_certificate(&impostor.id()).is_none());
}

#[test]
fn test_cached_certificate_avoids_lookup() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let peer = identity("peer");

    node.find_certificate(&peer.id(), Box::new(|certificate| assert!(certificate.is_some())));
    let mut lookup = dht.take_get(&peer.id());
    lookup.deliver(vec![certificate_value(&peer)]);
    lookup.finish(true);

    let hit = Arc::new(Mutex::new(false));
    let hit_cb = hit.clone();
    node.find_certificate(&peer.id(), Box::new(move |certificate| {
        *hit_cb.lock().unwrap() = certificate.is_some();
    }));

    assert!(*hit.lock().unwrap());
    assert_eq!(dht.requests_for(&peer.id()), 1);
}

#[test]
fn test_concurrent_searches_are_not_merged() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let peer = NodeId::random();

    node.find_certificate(&peer, Box::new(|_| {}));
    node.find_certificate(&peer, Box::new(|_| {}));

    assert_eq!(dht.requests_for(&peer), 2);
}

#[test]
fn test_put_encrypted_without_certificate_fails() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let key = NodeId::hash(b"abc");
    let peer_x = NodeId::hash(b"peerX");
    let recorder = Recorder::default();

    node.put_encrypted(&key, &peer_x, Value::new(USER_DATA_TYPE, b"hello".to_vec()), recorder.on_done())
        .unwrap();

    dht.take_get(&peer_x).finish(true);

    assert_eq!(recorder.done(), vec![false]);
    assert_eq!(dht.put_count(), 0);
}

#[test]
fn test_put_encrypted_after_certificate_resolves() {
    let dht = Arc::new(ScriptedDht::default());
    let node = secure_node(&dht, identity("local"));
    let peer = identity("peer");
    let key = NodeId::random();
    let recorder = Recorder::default();

    node.put_encrypted(&key, &peer.id(), Value::new(USER_DATA_TYPE, b"hello".to_vec()), recorder.on_done())
        .unwrap();
    assert_eq!(dht.put_count(), 0);

    let mut lookup = dht.take_get(&peer.id());
    lookup.deliver(vec![certificate_value(&peer)]);

    assert_eq!(recorder.done(), vec![true]);
    let puts = dht.puts.lock().unwrap();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].0, key);
    assert!(puts[0].1.is_encrypted());
}

#[test]
fn test_put_signed_signs_before_put() {
    let dht = Arc::new(ScriptedDht::default());
    let local = identity("local");
    let node = secure_node(&dht, local.clone());
    let key = NodeId::random();
    let recorder = Recorder::default();

    node.put_signed(&key, Value::new(USER_DATA_TYPE, b"hello".to_vec()), recorder.on_done()).unwrap();

    assert_eq!(recorder.done(), vec![true]);
    let puts = dht.puts.lock().unwrap();
    assert_eq!(puts[0].1.owner(), Some(&local.id()));
}
