use crate::crypto::PublicKey;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;

/// InfoHash 长度（160位）
pub const HASH_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum NodeIdError {
    #[error("Invalid node ID length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// 160位标识符，既是DHT键也是节点身份
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; HASH_LEN]);

impl NodeId {
    /// Derives a NodeId from a public key
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self::hash(&key.to_bytes())
    }

    /// SHA-256 摘要截断到160位
    pub fn hash(data: &[u8]) -> Self {
        let digest = ring::digest::digest(&ring::digest::SHA256, data);

        let mut id = [0u8; HASH_LEN];
        id.copy_from_slice(&digest.as_ref()[..HASH_LEN]);

        Self(id)
    }

    /// Generates a random NodeId
    pub fn random() -> Self {
        let mut id = [0u8; HASH_LEN];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut id);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Calculates the XOR distance between two NodeIds
    pub fn distance(&self, other: &Self) -> [u8; HASH_LEN] {
        let mut result = [0u8; HASH_LEN];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        result
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = NodeIdError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != HASH_LEN {
            return Err(NodeIdError::InvalidLength {
                expected: HASH_LEN,
                actual: bytes.len(),
            });
        }

        let mut id = [0u8; HASH_LEN];
        id.copy_from_slice(bytes);

        Ok(Self(id))
    }
}
