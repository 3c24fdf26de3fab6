use crate::dht::NodeId;
use crate::identity::{Identity, IdentityError};
use crate::storage::{Database, DatabaseError};
use log::{error, info};
use std::time::Duration;
use thiserror::Error;

const IDENTITIES_TREE: &str = "identities";

#[derive(Error, Debug)]
pub enum IdentityStoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Identity not found: {0}")]
    IdentityNotFound(NodeId),

    #[error("Identity error: {0}")]
    IdentityError(#[from] IdentityError),
}

/// 本地身份的持久化存储，以节点ID为键
pub struct IdentityStore {
    db: Database,
}

impl IdentityStore {
    pub fn new(db: &Database) -> Self {
        Self { db: db.clone() }
    }

    pub fn save_identity(&self, identity: &Identity) -> Result<(), IdentityStoreError> {
        let id = identity.id();
        self.db.put_serialized(IDENTITIES_TREE, id.as_bytes(), identity)?;
        self.db.flush()?;
        info!("Saved identity {}", id);
        Ok(())
    }

    pub fn load_identity(&self, id: &NodeId) -> Result<Identity, IdentityStoreError> {
        self.db.get_serialized(IDENTITIES_TREE, id.as_bytes())?
            .ok_or(IdentityStoreError::IdentityNotFound(*id))
    }

    /// 已保存的身份ID
    pub fn list_identities(&self) -> Result<Vec<NodeId>, IdentityStoreError> {
        let ids = self.db.keys(IDENTITIES_TREE)?
            .into_iter()
            .filter_map(|key| NodeId::try_from(key.as_slice()).ok())
            .collect();
        Ok(ids)
    }

    /// 删除身份，返回身份是否存在
    pub fn delete_identity(&self, id: &NodeId) -> Result<bool, IdentityStoreError> {
        Ok(self.db.delete(IDENTITIES_TREE, id.as_bytes())?)
    }

    /// 加载第一个保存的身份；没有或无法读取时生成并保存新身份
    pub fn load_or_generate(&self, name: &str, validity: Duration) -> Result<Identity, IdentityStoreError> {
        if let Some(id) = self.list_identities()?.into_iter().next() {
            match self.load_identity(&id) {
                Ok(identity) => {
                    info!("Loaded identity {}", id);
                    return Ok(identity);
                }
                Err(e) => error!("Error loading identity {}: {}", id, e),
            }
        }

        info!("Generating new identity '{}'", name);
        let identity = Identity::generate(name, validity)?;
        self.save_identity(&identity)?;
        Ok(identity)
    }
}
