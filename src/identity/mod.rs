use crate::crypto::{Certificate, CertificateError, KeyError, KeyPair, PublicKey, SecretKey};
use crate::dht::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Identity creation failed: {0}")]
    CreationFailed(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

/// 本地节点的密码学身份：私钥和证书
///
/// 由 `SecureDht` 独占持有。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    keypair: KeyPair,
    certificate: Arc<Certificate>,
}

impl Identity {
    /// 由已有的私钥和证书组成身份
    ///
    /// 不要求两者匹配；不匹配的身份由 `SecureDht` 以降级模式运行。
    pub fn new(secret: SecretKey, certificate: Certificate) -> Self {
        Self {
            keypair: KeyPair::from_secret(secret),
            certificate: Arc::new(certificate),
        }
    }

    /// 生成新的密钥对和自签名证书
    pub fn generate(name: &str, validity: Duration) -> Result<Self, IdentityError> {
        let keypair = KeyPair::generate()?;
        let certificate = Certificate::generate(name, &keypair, validity)?;

        Ok(Self {
            keypair,
            certificate: Arc::new(certificate),
        })
    }

    /// 本地节点ID，由私钥对应的公钥派生
    pub fn id(&self) -> NodeId {
        self.keypair.id()
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.keypair.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    pub fn certificate(&self) -> &Arc<Certificate> {
        &self.certificate
    }

    /// 证书中的公钥是否就是私钥对应的公钥
    pub fn is_consistent(&self) -> bool {
        self.certificate.public_key() == &self.keypair.public
    }
}
