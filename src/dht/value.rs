use crate::dht::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// 值ID，同一个键下相同ID的值互相替换
pub type ValueId = u64;

/// 值类型ID
pub type ValueTypeId = u16;

#[derive(Error, Debug)]
pub enum ValueError {
    #[error("Value serialization failed: {0}")]
    Serialization(String),

    #[error("Value deserialization failed: {0}")]
    Deserialization(String),
}

/// DHT值类型声明
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueType {
    pub id: ValueTypeId,
    pub name: String,
    /// 存储节点保留该类型值的时长
    pub expiration: Duration,
}

impl ValueType {
    pub fn new(id: ValueTypeId, name: &str, expiration: Duration) -> Self {
        Self {
            id,
            name: name.to_string(),
            expiration,
        }
    }

    /// 普通用户数据，10分钟
    pub fn user_data() -> Self {
        Self::new(USER_DATA_TYPE, "User Data", Duration::from_secs(10 * 60))
    }

    /// 节点证书，7天
    pub fn certificate() -> Self {
        Self::new(CERTIFICATE_TYPE, "Certificate", Duration::from_secs(7 * 24 * 60 * 60))
    }
}

pub const USER_DATA_TYPE: ValueTypeId = 0;
pub const CERTIFICATE_TYPE: ValueTypeId = 8;

/// 值的载荷
///
/// 签名和加密是互斥的线上状态：加密值的签名位于密文内部。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Plain {
        data: Vec<u8>,
    },
    Signed {
        owner: NodeId,
        signature: Vec<u8>,
        data: Vec<u8>,
    },
    Encrypted {
        cypher: Vec<u8>,
    },
}

/// DHT中存储的值
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub id: ValueId,
    pub type_id: ValueTypeId,
    pub payload: Payload,
}

impl Value {
    /// 创建明文值，随机分配ID
    pub fn new(type_id: ValueTypeId, data: Vec<u8>) -> Self {
        Self::with_id(rand::random(), type_id, data)
    }

    pub fn with_id(id: ValueId, type_id: ValueTypeId, data: Vec<u8>) -> Self {
        Self {
            id,
            type_id,
            payload: Payload::Plain { data },
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.payload, Payload::Signed { .. })
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.payload, Payload::Encrypted { .. })
    }

    /// 明文数据；加密值没有可读数据
    pub fn data(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Plain { data } | Payload::Signed { data, .. } => Some(data),
            Payload::Encrypted { .. } => None,
        }
    }

    /// 签名者
    pub fn owner(&self) -> Option<&NodeId> {
        match &self.payload {
            Payload::Signed { owner, .. } => Some(owner),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Signed { signature, .. } => Some(signature),
            _ => None,
        }
    }

    /// 签名覆盖的字节：(id, type, owner, data)
    pub fn signable_bytes(&self, owner: &NodeId) -> Result<Vec<u8>, ValueError> {
        let data = self.data().unwrap_or_default();
        bincode::serialize(&(self.id, self.type_id, owner, data))
            .map_err(|e| ValueError::Serialization(e.to_string()))
    }

    /// 完整的线上形式，也是加密前的明文
    pub fn to_bytes(&self) -> Result<Vec<u8>, ValueError> {
        bincode::serialize(self).map_err(|e| ValueError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        bincode::deserialize(bytes).map_err(|e| ValueError::Deserialization(e.to_string()))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Value");
        s.field("id", &format!("{:016x}", self.id))
            .field("type", &self.type_id);
        match &self.payload {
            Payload::Plain { data } => s.field("data", &format!("[{} bytes]", data.len())),
            Payload::Signed { owner, data, .. } => s
                .field("owner", owner)
                .field("data", &format!("[{} bytes, signed]", data.len())),
            Payload::Encrypted { cypher } => s.field("cypher", &format!("[{} bytes]", cypher.len())),
        };
        s.finish()
    }
}

/// 值过滤器
pub type ValueFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// 只接受指定类型的值
pub fn type_filter(type_id: ValueTypeId) -> ValueFilter {
    Arc::new(move |value: &Value| value.type_id == type_id)
}
