//! In-process persistence adapter, default and always available.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{PersistenceAdapter, PersistenceError};

#[derive(Default)]
pub struct MemoryPersistenceAdapter {
    store: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryPersistenceAdapter {
    pub fn new() -> Self {
        Self { store: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistenceAdapter {
    async fn save(&self, namespace: &str, key: &str, data: Value) -> Result<(), PersistenceError> {
        let mut store = self.store.lock().await;
        store.entry(namespace.to_string()).or_default().insert(key.to_string(), data);
        Ok(())
    }

    async fn load(&self, namespace: &str, key: &str) -> Result<Value, PersistenceError> {
        let store = self.store.lock().await;
        store
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound { namespace: namespace.to_string(), key: key.to_string() })
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>, PersistenceError> {
        let store = self.store.lock().await;
        Ok(store.get(namespace).map(|ns| ns.keys().cloned().collect()).unwrap_or_default())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), PersistenceError> {
        let mut store = self.store.lock().await;
        if let Some(ns) = store.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, PersistenceError> {
        let store = self.store.lock().await;
        Ok(store.get(namespace).map(|ns| ns.contains_key(key)).unwrap_or(false))
    }
}
