use crate::crypto::encryption::{open_sealed, seal};
use crate::crypto::{EncryptionError, SignatureError};
use crate::dht::NodeId;
use ed25519_dalek::{PublicKey as EdPublicKey, SecretKey as EdSecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// 公钥序列化后的固定长度（Ed25519 + X25519）
pub const PUBLIC_KEY_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Key generation failed: {0}")]
    GenerationFailed(String),

    #[error("Key deserialization failed: {0}")]
    DeserializationFailed(String),
}

/// A peer's public key: Ed25519 for signatures, X25519 for sealed encryption.
#[derive(Clone)]
pub struct PublicKey {
    /// Ed25519 public key for signing
    signing_key: EdPublicKey,

    /// X25519 public key for encryption
    encryption_key: X25519PublicKey,
}

// ed25519_dalek::PublicKey 没有实现 serde，使用固定的字节形式
impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("PublicKey", 2)?;
        state.serialize_field("signing_key", self.signing_key.as_bytes())?;
        state.serialize_field("encryption_key", self.encryption_key.as_bytes())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, SeqAccess, Visitor};

        struct PublicKeyVisitor;

        impl<'de> Visitor<'de> for PublicKeyVisitor {
            type Value = PublicKey;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct PublicKey")
            }

            // bincode 按序列访问结构体字段
            fn visit_seq<A>(self, mut seq: A) -> Result<PublicKey, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let signing_key_bytes: [u8; 32] = seq.next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let encryption_key_bytes: [u8; 32] = seq.next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;

                PublicKey::from_parts(signing_key_bytes, encryption_key_bytes)
                    .map_err(de::Error::custom)
            }

            fn visit_map<V>(self, mut map: V) -> Result<PublicKey, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut signing_key_bytes = None;
                let mut encryption_key_bytes = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "signing_key" => {
                            if signing_key_bytes.is_some() {
                                return Err(de::Error::duplicate_field("signing_key"));
                            }
                            signing_key_bytes = Some(map.next_value::<[u8; 32]>()?);
                        }
                        "encryption_key" => {
                            if encryption_key_bytes.is_some() {
                                return Err(de::Error::duplicate_field("encryption_key"));
                            }
                            encryption_key_bytes = Some(map.next_value::<[u8; 32]>()?);
                        }
                        _ => {
                            let _ = map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }

                let signing_key_bytes = signing_key_bytes.ok_or_else(|| de::Error::missing_field("signing_key"))?;
                let encryption_key_bytes = encryption_key_bytes.ok_or_else(|| de::Error::missing_field("encryption_key"))?;

                PublicKey::from_parts(signing_key_bytes, encryption_key_bytes)
                    .map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_struct("PublicKey", &["signing_key", "encryption_key"], PublicKeyVisitor)
    }
}

impl PublicKey {
    /// Creates a new PublicKey from raw components
    pub fn new(signing_key: EdPublicKey, encryption_key: X25519PublicKey) -> Self {
        Self {
            signing_key,
            encryption_key,
        }
    }

    fn from_parts(signing_key: [u8; 32], encryption_key: [u8; 32]) -> Result<Self, KeyError> {
        let signing_key = EdPublicKey::from_bytes(&signing_key)
            .map_err(|e| KeyError::DeserializationFailed(e.to_string()))?;

        Ok(Self {
            signing_key,
            encryption_key: X25519PublicKey::from(encryption_key),
        })
    }

    /// Returns the signing key
    pub fn signing_key(&self) -> &EdPublicKey {
        &self.signing_key
    }

    /// Returns the encryption key
    pub fn encryption_key(&self) -> &X25519PublicKey {
        &self.encryption_key
    }

    /// 由公钥派生的节点ID
    pub fn id(&self) -> NodeId {
        NodeId::from_public_key(self)
    }

    /// 检查签名是否由该公钥的持有者生成
    pub fn check_signature(&self, data: &[u8], signature: &[u8]) -> bool {
        crate::crypto::verify(self, data, signature).is_ok()
    }

    /// 为该公钥的持有者加密数据，只有对应私钥能解开
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        seal(self, data)
    }

    /// Converts the public key to its fixed 64-byte form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(PUBLIC_KEY_LEN);
        buffer.extend_from_slice(self.signing_key.as_bytes());
        buffer.extend_from_slice(self.encryption_key.as_bytes());
        buffer
    }

    /// Creates a public key from its 64-byte form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(KeyError::DeserializationFailed(format!("Expected {} bytes, got {}", PUBLIC_KEY_LEN, bytes.len())));
        }

        let mut signing_key = [0u8; 32];
        signing_key.copy_from_slice(&bytes[0..32]);
        let mut encryption_key = [0u8; 32];
        encryption_key.copy_from_slice(&bytes[32..64]);

        Self::from_parts(signing_key, encryption_key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.signing_key.as_bytes()[0..4]))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.signing_key.as_bytes() == other.signing_key.as_bytes() &&
        self.encryption_key.as_bytes() == other.encryption_key.as_bytes()
    }
}

impl Eq for PublicKey {}

/// The local node's private key.
#[derive(Clone)]
pub struct SecretKey {
    /// Ed25519 secret key for signing, shared because EdSecretKey has no Clone
    signing_key: Arc<EdSecretKey>,

    /// X25519 secret key for decryption
    encryption_key: StaticSecret,
}

impl Serialize for SecretKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        SecretKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl SecretKey {
    /// Creates a new SecretKey from raw components
    pub fn new(signing_key: EdSecretKey, encryption_key: StaticSecret) -> Self {
        Self {
            signing_key: Arc::new(signing_key),
            encryption_key,
        }
    }

    /// Returns the signing key
    pub fn signing_key(&self) -> &EdSecretKey {
        &self.signing_key
    }

    /// Returns the encryption key
    pub fn encryption_key(&self) -> &StaticSecret {
        &self.encryption_key
    }

    /// 对应的公钥
    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(
            EdPublicKey::from(self.signing_key()),
            X25519PublicKey::from(&self.encryption_key),
        )
    }

    /// 签名数据
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        crate::crypto::sign(self, data)
    }

    /// 解密发给该私钥持有者的数据
    pub fn decrypt(&self, cypher: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        open_sealed(self, cypher)
    }

    /// Converts the secret key to a byte array for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(64);
        buffer.extend_from_slice(self.signing_key.as_bytes());
        buffer.extend_from_slice(&self.encryption_key.to_bytes());
        buffer
    }

    /// Creates a secret key from a byte array
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 64 {
            return Err(KeyError::DeserializationFailed(format!("Expected 64 bytes, got {}", bytes.len())));
        }

        let signing_key = EdSecretKey::from_bytes(&bytes[0..32])
            .map_err(|e| KeyError::DeserializationFailed(e.to_string()))?;

        let mut encryption_key_bytes = [0u8; 32];
        encryption_key_bytes.copy_from_slice(&bytes[32..64]);

        Ok(SecretKey::new(signing_key, StaticSecret::from(encryption_key_bytes)))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey {{ <redacted> }}")
    }
}

/// Represents a key pair (public and secret keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generates a new random key pair
    pub fn generate() -> Result<Self, KeyError> {
        // 签名密钥和加密密钥使用同一个随机种子
        let mut seed = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut seed);

        let signing_key = EdSecretKey::from_bytes(&seed)
            .map_err(|e| KeyError::GenerationFailed(e.to_string()))?;
        let encryption_key = StaticSecret::from(seed);

        Ok(Self::from_secret(SecretKey::new(signing_key, encryption_key)))
    }

    /// Creates a key pair from existing secret key
    pub fn from_secret(secret: SecretKey) -> Self {
        Self {
            public: secret.public_key(),
            secret,
        }
    }

    /// 本地节点ID
    pub fn id(&self) -> NodeId {
        self.public.id()
    }
}
