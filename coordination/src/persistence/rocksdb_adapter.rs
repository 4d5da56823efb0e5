//! Embedded RocksDB-backed persistence adapter, behind `heavy-state`.
//!
//! One column family per namespace, created on first use. Values are
//! encoded with `bincode` as a `Vec<u8>` wrapping the `serde_json::Value`
//! so the on-disk representation stays backend-agnostic at the boundary.

use std::sync::RwLock;

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde_json::Value;

use super::{PersistenceAdapter, PersistenceError};

pub struct RocksDbPersistenceAdapter {
    db: RwLock<DB>,
    path: std::path::PathBuf,
}

impl RocksDbPersistenceAdapter {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let existing_cfs = DB::list_cf(&opts, &path).unwrap_or_default();
        let cfs: Vec<ColumnFamilyDescriptor> = existing_cfs
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cfs).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(Self { db: RwLock::new(db), path })
    }

    fn ensure_cf(&self, namespace: &str) -> Result<(), PersistenceError> {
        let needs_create = self.db.read().unwrap().cf_handle(namespace).is_none();
        if needs_create {
            let mut db = self.db.write().unwrap();
            if db.cf_handle(namespace).is_none() {
                db.create_cf(namespace, &Options::default()).map_err(|e| PersistenceError::Backend(e.to_string()))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for RocksDbPersistenceAdapter {
    async fn save(&self, namespace: &str, key: &str, data: Value) -> Result<(), PersistenceError> {
        self.ensure_cf(namespace)?;
        let db = self.db.read().unwrap();
        let cf = db.cf_handle(namespace).expect("column family just ensured");
        let encoded = bincode::serde::encode_to_vec(&data, bincode::config::standard())
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        db.put_cf(cf, key, encoded).map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    async fn load(&self, namespace: &str, key: &str) -> Result<Value, PersistenceError> {
        self.ensure_cf(namespace)?;
        let db = self.db.read().unwrap();
        let cf = db.cf_handle(namespace).expect("column family just ensured");
        let bytes = db
            .get_cf(cf, key)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?
            .ok_or_else(|| PersistenceError::NotFound { namespace: namespace.to_string(), key: key.to_string() })?;
        let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        Ok(value)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>, PersistenceError> {
        self.ensure_cf(namespace)?;
        let db = self.db.read().unwrap();
        let cf = db.cf_handle(namespace).expect("column family just ensured");
        let keys = db
            .iterator_cf(cf, rocksdb::IteratorMode::Start)
            .filter_map(|item| item.ok())
            .map(|(k, _)| String::from_utf8_lossy(&k).to_string())
            .collect();
        Ok(keys)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), PersistenceError> {
        self.ensure_cf(namespace)?;
        let db = self.db.read().unwrap();
        let cf = db.cf_handle(namespace).expect("column family just ensured");
        db.delete_cf(cf, key).map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, PersistenceError> {
        self.ensure_cf(namespace)?;
        let db = self.db.read().unwrap();
        let cf = db.cf_handle(namespace).expect("column family just ensured");
        Ok(db.key_may_exist_cf(cf, key) && db.get_cf(cf, key).map_err(|e| PersistenceError::Backend(e.to_string()))?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn roundtrips_nested_values_through_a_real_db() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = RocksDbPersistenceAdapter::open(dir.path()).unwrap();
        let value = json!({"a": {"b": [1, 2, 3]}});
        adapter.save("ns", "k", value.clone()).await.unwrap();
        assert_eq!(adapter.load("ns", "k").await.unwrap(), value);
    }

    #[tokio::test]
    async fn reopening_the_same_path_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let adapter = RocksDbPersistenceAdapter::open(dir.path()).unwrap();
            adapter.save("ns", "k", json!(42)).await.unwrap();
        }
        let reopened = RocksDbPersistenceAdapter::open(dir.path()).unwrap();
        assert_eq!(reopened.load("ns", "k").await.unwrap(), json!(42));
    }
}
