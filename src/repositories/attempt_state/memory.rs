use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{AttemptStateStore, StoreError};

/// Process-local store. Progress survives closing and reopening a view, not a restart.
#[derive(Debug, Default)]
pub(crate) struct MemoryStateStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AttemptStateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries =
            self.entries.write().map_err(|err| StoreError::Backend(err.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut entries =
            self.entries.write().map_err(|err| StoreError::Backend(err.to_string()))?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries =
            self.entries.write().map_err(|err| StoreError::Backend(err.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStateStore::default();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1").await.unwrap();
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(store.len(), 1);

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_keeps_the_first_value() {
        let store = MemoryStateStore::default();

        assert!(store.set_if_absent("start", "1000").await.unwrap());
        assert!(!store.set_if_absent("start", "2000").await.unwrap());

        assert_eq!(store.get("start").await.unwrap().as_deref(), Some("1000"));
    }
}
