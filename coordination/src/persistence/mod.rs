//! Persistence Adapter (C15, §4.14 expansion, §6).
//!
//! `save(namespace, key, data) / load / list / delete / exists`, where
//! `data` round-trips through `serde_json::Value` at the trait boundary
//! regardless of backend. [`MemoryPersistenceAdapter`] is always
//! available; [`rocksdb_adapter::RocksDbPersistenceAdapter`] is an
//! optional embedded backend behind the `heavy-state` feature.

pub mod memory;

#[cfg(feature = "heavy-state")]
pub mod rocksdb_adapter;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryPersistenceAdapter;
#[cfg(feature = "heavy-state")]
pub use rocksdb_adapter::RocksDbPersistenceAdapter;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("key not found: {namespace}/{key}")]
    NotFound { namespace: String, key: String },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save(&self, namespace: &str, key: &str, data: Value) -> Result<(), PersistenceError>;
    async fn load(&self, namespace: &str, key: &str) -> Result<Value, PersistenceError>;
    async fn list(&self, namespace: &str) -> Result<Vec<String>, PersistenceError>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), PersistenceError>;
    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, PersistenceError>;
}
