use crate::crypto::{KeyPair, PublicKey};
use crate::dht::NodeId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 默认证书有效期：700天
pub const DEFAULT_CERTIFICATE_VALIDITY: Duration = Duration::from_secs(700 * 24 * 60 * 60);

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Malformed certificate: {0}")]
    Malformed(String),

    #[error("Invalid certificate signature for {0}")]
    InvalidSignature(NodeId),

    #[error("Certificate {0} expired at {1}")]
    Expired(NodeId, DateTime<Utc>),

    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),
}

/// 节点证书
///
/// 绑定公钥与节点身份的自签名文档。节点ID由内嵌公钥派生，
/// 序列化形式（bincode）就是证书类型DHT值的数据。
#[derive(Clone, Serialize, Deserialize)]
pub struct Certificate {
    /// 证书名称
    pub name: String,

    /// 序列号
    pub serial: u64,

    /// 内嵌公钥
    public_key: PublicKey,

    /// 生效时间
    pub activation: DateTime<Utc>,

    /// 过期时间
    pub expiration: DateTime<Utc>,

    /// 自签名
    signature: Vec<u8>,
}

impl Certificate {
    /// 为密钥对生成自签名证书
    pub fn generate(name: &str, keypair: &KeyPair, validity: Duration) -> Result<Self, CertificateError> {
        let validity = ChronoDuration::from_std(validity)
            .map_err(|e| CertificateError::GenerationFailed(e.to_string()))?;
        let now = Utc::now();

        let mut certificate = Self {
            name: name.to_string(),
            serial: rand::random(),
            public_key: keypair.public.clone(),
            activation: now,
            expiration: now + validity,
            signature: Vec::new(),
        };

        let tbs = certificate.signable_bytes()
            .map_err(|e| CertificateError::GenerationFailed(e.to_string()))?;
        certificate.signature = keypair.secret.sign(&tbs)
            .map_err(|e| CertificateError::GenerationFailed(e.to_string()))?;

        Ok(certificate)
    }

    /// 解析证书字节并校验自签名和有效期
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CertificateError> {
        let certificate: Certificate = bincode::deserialize(bytes)
            .map_err(|e| CertificateError::Malformed(e.to_string()))?;

        certificate.verify()?;

        Ok(certificate)
    }

    /// 序列化证书
    pub fn to_bytes(&self) -> Result<Vec<u8>, CertificateError> {
        bincode::serialize(self).map_err(|e| CertificateError::Malformed(e.to_string()))
    }

    /// 校验自签名和有效期
    pub fn verify(&self) -> Result<(), CertificateError> {
        let tbs = self.signable_bytes()?;
        if !self.public_key.check_signature(&tbs, &self.signature) {
            return Err(CertificateError::InvalidSignature(self.id()));
        }

        if self.is_expired() {
            return Err(CertificateError::Expired(self.id(), self.expiration));
        }

        Ok(())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// 证书对应的节点ID
    pub fn id(&self) -> NodeId {
        self.public_key.id()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiration
    }

    fn signable_bytes(&self) -> Result<Vec<u8>, CertificateError> {
        bincode::serialize(&(
            &self.name,
            self.serial,
            &self.public_key,
            self.activation,
            self.expiration,
        ))
        .map_err(|e| CertificateError::Malformed(e.to_string()))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("name", &self.name)
            .field("id", &self.id())
            .field("serial", &self.serial)
            .field("expiration", &self.expiration)
            .finish()
    }
}
