use async_trait::async_trait;
use dashmap::DashMap;

use super::{KvStore, Revision};
use crate::error::CoreError;

/// In-memory `KvStore`, grounded on `RegistryStore::in_memory()`
/// (`daemon/src/a2a/registry/store.rs`) — a process-wide test/mock
/// construct; production wiring uses a real backing store instead (§9
/// "Global state").
#[derive(Default)]
pub struct InMemoryKv {
    buckets: DashMap<String, DashMap<String, (Vec<u8>, Revision)>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(
        &self,
        name: &str,
    ) -> dashmap::mapref::one::RefMut<'_, String, DashMap<String, (Vec<u8>, Revision)>> {
        self.buckets.entry(name.to_string()).or_default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<(Vec<u8>, Revision)>, CoreError> {
        Ok(self.bucket(bucket).get(key).map(|entry| entry.value().clone()))
    }

    async fn create(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<Revision, CoreError> {
        let bucket = self.bucket(bucket);
        match bucket.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CoreError::conflict(format!("key '{key}' already exists")))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert((value, 1));
                Ok(1)
            }
        }
    }

    async fn update(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        expected_rev: Revision,
    ) -> Result<Revision, CoreError> {
        let bucket = self.bucket(bucket);
        match bucket.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let (_, current_rev) = entry.get();
                if *current_rev != expected_rev {
                    return Err(CoreError::conflict(format!(
                        "revision mismatch: expected {expected_rev}, got {current_rev}"
                    )));
                }
                let new_rev = current_rev + 1;
                entry.insert((value, new_rev));
                Ok(new_rev)
            }
            dashmap::mapref::entry::Entry::Vacant(_) => Err(CoreError::not_found(key.to_string())),
        }
    }

    async fn delete(&self, bucket: &str, key: &str, expected_rev: Revision) -> Result<(), CoreError> {
        let bucket = self.bucket(bucket);
        match bucket.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let (_, current_rev) = entry.get();
                if *current_rev != expected_rev {
                    return Err(CoreError::conflict(format!(
                        "revision mismatch: expected {expected_rev}, got {current_rev}"
                    )));
                }
                entry.remove();
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(_) => Err(CoreError::not_found(key.to_string())),
        }
    }

    async fn get_revision(&self, bucket: &str, key: &str) -> Result<Revision, CoreError> {
        self.bucket(bucket)
            .get(key)
            .map(|entry| entry.value().1)
            .ok_or_else(|| CoreError::not_found(key.to_string()))
    }

    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, CoreError> {
        Ok(self
            .bucket(bucket)
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let kv = InMemoryKv::new();
        let rev = kv.create("b", "k", b"v".to_vec()).await.unwrap();
        assert_eq!(rev, 1);
        let (value, rev) = kv.get("b", "k").await.unwrap().unwrap();
        assert_eq!(value, b"v");
        assert_eq!(rev, 1);
    }

    #[tokio::test]
    async fn second_create_conflicts() {
        let kv = InMemoryKv::new();
        kv.create("b", "k", b"v".to_vec()).await.unwrap();
        assert!(kv.create("b", "k", b"v2".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn update_with_stale_revision_conflicts() {
        let kv = InMemoryKv::new();
        kv.create("b", "k", b"v".to_vec()).await.unwrap();
        kv.update("b", "k", b"v2".to_vec(), 1).await.unwrap();
        let err = kv.update("b", "k", b"v3".to_vec(), 1).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_requires_matching_revision() {
        let kv = InMemoryKv::new();
        kv.create("b", "k", b"v".to_vec()).await.unwrap();
        assert!(kv.delete("b", "k", 2).await.is_err());
        kv.delete("b", "k", 1).await.unwrap();
        assert!(kv.get("b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_prefix_filters_by_prefix() {
        let kv = InMemoryKv::new();
        kv.create("b", "lookup/x/1", vec![]).await.unwrap();
        kv.create("b", "lookup/x/2", vec![]).await.unwrap();
        kv.create("b", "lookup/y/1", vec![]).await.unwrap();
        let mut keys = kv.list_prefix("b", "lookup/x/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["lookup/x/1".to_string(), "lookup/x/2".to_string()]);
    }
}
