use crate::crypto::PublicKey;
use crate::dht::{DoneCallback, NodeId, Payload, Value};
use crate::identity::Identity;
use crate::secure::verification::check_value_signature;
use crate::secure::{SecureDht, SecureDhtError};
use log::{debug, error, warn};

/// 用本地身份签名
///
/// 已由本地身份签名的值保持不变；其他签名者的签名会被替换。
pub(crate) fn sign_value(identity: &Identity, value: &mut Value) -> Result<(), SecureDhtError> {
    let local_id = identity.id();

    match &value.payload {
        Payload::Encrypted { .. } => return Err(SecureDhtError::AlreadyEncrypted),
        Payload::Signed { owner, .. } if *owner == local_id => {
            debug!("Value {:016x} already signed by {}", value.id, local_id);
            return Ok(());
        }
        _ => {}
    }

    let tbs = value.signable_bytes(&local_id)?;
    let signature = identity.secret_key().sign(&tbs)?;

    // 加密值在上面已经返回
    let data = match &mut value.payload {
        Payload::Plain { data } | Payload::Signed { data, .. } => std::mem::take(data),
        Payload::Encrypted { .. } => Vec::new(),
    };
    value.payload = Payload::Signed {
        owner: local_id,
        signature,
        data,
    };

    Ok(())
}

/// 签名后加密给接收方，外层值保留ID和类型
pub(crate) fn encrypt_value(identity: &Identity, value: &Value, recipient: &PublicKey) -> Result<Value, SecureDhtError> {
    if value.is_encrypted() {
        return Err(SecureDhtError::AlreadyEncrypted);
    }

    let mut inner = value.clone();
    sign_value(identity, &mut inner)?;

    let plain = inner.to_bytes()?;
    let cypher = recipient.encrypt(&plain)
        .map_err(|e| SecureDhtError::Encryption(e.to_string()))?;

    Ok(Value {
        id: value.id,
        type_id: value.type_id,
        payload: Payload::Encrypted { cypher },
    })
}

/// 用本地私钥解密，返回内层值
pub(crate) fn decrypt_value(identity: &Identity, value: &Value) -> Result<Value, SecureDhtError> {
    let Payload::Encrypted { cypher } = &value.payload else {
        return Err(SecureDhtError::NotEncrypted);
    };

    let plain = identity.secret_key().decrypt(cypher)
        .map_err(|e| SecureDhtError::Decryption(e.to_string()))?;
    let inner = Value::from_bytes(&plain)
        .map_err(|e| SecureDhtError::Decryption(e.to_string()))?;

    if inner.is_encrypted() {
        return Err(SecureDhtError::Decryption("nested encrypted value".to_string()));
    }

    if inner.type_id != value.type_id {
        return Err(SecureDhtError::Decryption(format!(
            "inner type {} does not match outer type {}",
            inner.type_id, value.type_id
        )));
    }

    Ok(inner)
}

impl SecureDht {
    /// 签名值；对加密值报错，已由本节点签名时不做任何事
    pub fn sign(&self, value: &mut Value) -> Result<(), SecureDhtError> {
        sign_value(&self.identity, value)
    }

    /// 签名后加密给指定公钥
    pub fn encrypt(&self, value: &Value, recipient: &PublicKey) -> Result<Value, SecureDhtError> {
        encrypt_value(&self.identity, value, recipient)
    }

    /// 解密发给本节点的值
    pub fn decrypt(&self, value: &Value) -> Result<Value, SecureDhtError> {
        decrypt_value(&self.identity, value)
    }

    /// 解析签发者证书并验证签名，回调恰好执行一次
    pub fn verify_signed(&self, value: &Value, callback: Box<dyn FnOnce(bool) + Send>) -> Result<(), SecureDhtError> {
        let owner = *value.owner().ok_or(SecureDhtError::NotSigned)?;
        let value = value.clone();

        self.certificates.find_certificate(&owner, Box::new(move |certificate| {
            let valid = certificate.map_or(false, |c| check_value_signature(&value, &c));
            if !valid {
                debug!("Signature of value {:016x} from {} not verified", value.id, owner);
            }
            callback(valid);
        }));

        Ok(())
    }

    /// 签名后发布
    ///
    /// 发送前的错误直接返回，此时不会调用 `on_done`。
    pub fn put_signed(&self, key: &NodeId, mut value: Value, on_done: DoneCallback) -> Result<(), SecureDhtError> {
        self.ensure_active()?;
        self.sign(&mut value)?;

        debug!("Putting signed value {:016x} under {}", value.id, key);
        self.engine.put(key, value, on_done);
        Ok(())
    }

    /// 加密给 `recipient` 后发布
    ///
    /// 找不到接收方证书或加密失败时 `on_done(false)`，不会发布。
    pub fn put_encrypted(
        &self,
        key: &NodeId,
        recipient: &NodeId,
        value: Value,
        on_done: DoneCallback,
    ) -> Result<(), SecureDhtError> {
        self.ensure_active()?;
        if value.is_encrypted() {
            return Err(SecureDhtError::AlreadyEncrypted);
        }

        let key = *key;
        let recipient = *recipient;
        let engine = self.engine.clone();
        let identity = self.identity.clone();

        self.certificates.find_certificate(&recipient, Box::new(move |certificate| {
            let Some(certificate) = certificate else {
                warn!("Can't put encrypted value: no certificate for {}", recipient);
                on_done(false);
                return;
            };

            match encrypt_value(&identity, &value, certificate.public_key()) {
                Ok(encrypted) => {
                    debug!("Putting value {:016x} encrypted for {} under {}", encrypted.id, recipient, key);
                    engine.put(&key, encrypted, on_done);
                }
                Err(e) => {
                    error!("Encryption for {} failed: {}", recipient, e);
                    on_done(false);
                }
            }
        }));

        Ok(())
    }
}
