use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    DbError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// 按命名树组织的键值数据库
#[derive(Clone)]
pub struct Database {
    db: Arc<Db>,

    /// 已打开的树
    trees: Arc<Mutex<HashMap<String, Tree>>>,
}

impl Database {
    /// 打开（或创建）数据库目录
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let db = sled::open(path)?;

        Ok(Self {
            db: Arc::new(db),
            trees: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn tree(&self, name: &str) -> Result<Tree, DatabaseError> {
        let mut trees = self.trees.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tree) = trees.get(name) {
            return Ok(tree.clone());
        }

        let tree = self.db.open_tree(name)?;
        trees.insert(name.to_string(), tree.clone());
        Ok(tree)
    }

    pub fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(self.tree(tree)?.get(key)?.map(|v| v.to_vec()))
    }

    pub fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        self.tree(tree)?.insert(key, value)?;
        trace!("Stored {} bytes in {}", value.len(), tree);
        Ok(())
    }

    /// 删除键，返回键是否存在
    pub fn delete(&self, tree: &str, key: &[u8]) -> Result<bool, DatabaseError> {
        Ok(self.tree(tree)?.remove(key)?.is_some())
    }

    /// 树中所有的键，按字节序
    pub fn keys(&self, tree: &str) -> Result<Vec<Vec<u8>>, DatabaseError> {
        self.tree(tree)?
            .iter()
            .keys()
            .map(|key| key.map(|k| k.to_vec()).map_err(DatabaseError::from))
            .collect()
    }

    pub fn get_serialized<T: DeserializeOwned>(&self, tree: &str, key: &[u8]) -> Result<Option<T>, DatabaseError> {
        match self.get(tree, key)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| DatabaseError::DeserializationError(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn put_serialized<T: Serialize>(&self, tree: &str, key: &[u8], value: &T) -> Result<(), DatabaseError> {
        let bytes = bincode::serialize(value)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        self.put(tree, key, &bytes)
    }

    /// 刷新到磁盘
    pub fn flush(&self) -> Result<(), DatabaseError> {
        self.db.flush()?;
        Ok(())
    }
}
