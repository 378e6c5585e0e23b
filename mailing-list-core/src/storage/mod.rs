//! Revisioned key-value adapter (§4.1): a bucket-per-entity-class store with
//! monotonically-increasing per-key revisions and compare-and-swap
//! semantics, plus the three auxiliary key families (uniqueness constraints,
//! secondary indices, by-external-ID indices). Purely storage — no business
//! logic, no external calls, no publication, matching the contract in §4.1's
//! closing paragraph.
//!
//! Grounded on the `RegistryStore::in_memory()` / disk-backed split in
//! `daemon/src/a2a/registry/store.rs` and the per-concern provider-trait
//! composition in `daemon/src/core/storage/providers/versioned/mod.rs`.

mod memory;

pub use memory::InMemoryKv;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CoreError;

pub type Revision = u64;

/// Bucket names for primary entity records (§4.1 "Entities live under
/// primary keys `entity/<kind>/<UID>`").
pub mod bucket {
    pub const SERVICE: &str = "entity/service";
    pub const MAILING_LIST: &str = "entity/mailing_list";
    pub const MEMBER: &str = "entity/member";
    pub const UNIQUENESS: &str = "uniqueness";
    pub const LOOKUP: &str = "lookup";
    pub const EXTERNAL: &str = "external";
}

/// Storage adapter contract (§4.1 "Operations"). Implementations must be
/// safe for concurrent use (§5 "Shared-resource policy").
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<(Vec<u8>, Revision)>, CoreError>;

    /// `Conflict` if the key already exists.
    async fn create(&self, bucket: &str, key: &str, value: Vec<u8>) -> Result<Revision, CoreError>;

    /// `Conflict` if `expected_rev` does not match the current revision,
    /// `NotFound` if the key is absent.
    async fn update(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        expected_rev: Revision,
    ) -> Result<Revision, CoreError>;

    /// `Conflict` if `expected_rev` mismatches, `NotFound` if absent.
    async fn delete(&self, bucket: &str, key: &str, expected_rev: Revision) -> Result<(), CoreError>;

    async fn get_revision(&self, bucket: &str, key: &str) -> Result<Revision, CoreError>;

    /// Lists keys under a bucket with the given prefix, used by secondary
    /// index lookups (e.g. `lookup/list-by-service/<serviceUID>/`).
    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, CoreError>;

    /// Connectivity probe consumed by `GET /readyz` (Ambient §6a).
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Typed convenience wrapper over a `KvStore` for one entity kind's primary
/// records. Thin JSON (de)serialization only — callers own key derivation.
pub struct EntityStore<'a> {
    kv: &'a dyn KvStore,
    bucket: &'static str,
}

impl<'a> EntityStore<'a> {
    pub fn new(kv: &'a dyn KvStore, bucket: &'static str) -> Self {
        Self { kv, bucket }
    }

    fn primary_key(uid: &str) -> String {
        uid.to_string()
    }

    pub async fn get<T: DeserializeOwned>(&self, uid: &str) -> Result<Option<(T, Revision)>, CoreError> {
        match self.kv.get(self.bucket, &Self::primary_key(uid)).await? {
            Some((bytes, rev)) => {
                let value: T = serde_json::from_slice(&bytes)?;
                Ok(Some((value, rev)))
            }
            None => Ok(None),
        }
    }

    pub async fn create<T: Serialize>(&self, uid: &str, value: &T) -> Result<Revision, CoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.kv.create(self.bucket, &Self::primary_key(uid), bytes).await
    }

    pub async fn update<T: Serialize>(
        &self,
        uid: &str,
        value: &T,
        expected_rev: Revision,
    ) -> Result<Revision, CoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.kv
            .update(self.bucket, &Self::primary_key(uid), bytes, expected_rev)
            .await
    }

    pub async fn delete(&self, uid: &str, expected_rev: Revision) -> Result<(), CoreError> {
        self.kv.delete(self.bucket, &Self::primary_key(uid), expected_rev).await
    }
}

/// Creates a uniqueness-constraint key (§4.1 "their existence *is* the
/// constraint"). A second creation for a colliding hash fails with
/// `Conflict`, which callers turn into a disambiguated message naming the
/// conflicting dimension.
pub async fn reserve_uniqueness(kv: &dyn KvStore, index_key_hash: &str, owner_uid: &str) -> Result<(), CoreError> {
    kv.create(bucket::UNIQUENESS, index_key_hash, owner_uid.as_bytes().to_vec())
        .await
        .map(|_| ())
}

/// Resolves the owning UID of a uniqueness-constraint key, if reserved.
pub async fn lookup_uniqueness_owner(kv: &dyn KvStore, index_key_hash: &str) -> Result<Option<String>, CoreError> {
    match kv.get(bucket::UNIQUENESS, index_key_hash).await? {
        Some((bytes, _)) if !bytes.is_empty() => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
        _ => Ok(None),
    }
}

/// Best-effort rollback of a reserved uniqueness key; absence is tolerated
/// (§4.2 Phase B rollback, §4.2 "Delete specifics").
pub async fn release_uniqueness(kv: &dyn KvStore, index_key_hash: &str) {
    if let Ok(rev) = kv.get_revision(bucket::UNIQUENESS, index_key_hash).await {
        if let Err(err) = kv.delete(bucket::UNIQUENESS, index_key_hash, rev).await {
            log::error!("rollback: failed to release uniqueness key {index_key_hash}: {err}");
        }
    }
}

/// Forward-lookup secondary index key, e.g. `lookup/list-by-service/<serviceUID>/<listUID>`.
pub fn index_edge_key(family: &str, parent: &str, child: &str) -> String {
    format!("{family}/{parent}/{child}")
}

pub async fn create_index_edge(kv: &dyn KvStore, family: &str, parent: &str, child: &str) -> Result<(), CoreError> {
    kv.create(bucket::LOOKUP, &index_edge_key(family, parent, child), Vec::new())
        .await
        .map(|_| ())
}

pub async fn delete_index_edge(kv: &dyn KvStore, family: &str, parent: &str, child: &str) {
    let key = index_edge_key(family, parent, child);
    if let Ok(rev) = kv.get_revision(bucket::LOOKUP, &key).await {
        if let Err(err) = kv.delete(bucket::LOOKUP, &key, rev).await {
            log::error!("rollback: failed to delete index edge {key}: {err}");
        }
    }
}

pub async fn list_children(kv: &dyn KvStore, family: &str, parent: &str) -> Result<Vec<String>, CoreError> {
    let prefix = format!("{family}/{parent}/");
    let keys = kv.list_prefix(bucket::LOOKUP, &prefix).await?;
    Ok(keys
        .into_iter()
        .map(|k| k.trim_start_matches(&prefix).to_string())
        .collect())
}

/// By-external-ID index, e.g. `lookup/service-by-group/<groupID>`.
pub async fn put_external_index(kv: &dyn KvStore, family: &str, external_id: &str, uid: &str) -> Result<(), CoreError> {
    kv.create(bucket::EXTERNAL, &format!("{family}/{external_id}"), uid.as_bytes().to_vec())
        .await
        .map(|_| ())
}

pub async fn lookup_external_index(kv: &dyn KvStore, family: &str, external_id: &str) -> Result<Option<String>, CoreError> {
    match kv.get(bucket::EXTERNAL, &format!("{family}/{external_id}")).await? {
        Some((bytes, _)) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
        None => Ok(None),
    }
}

pub async fn delete_external_index(kv: &dyn KvStore, family: &str, external_id: &str) {
    let key = format!("{family}/{external_id}");
    if let Ok(rev) = kv.get_revision(bucket::EXTERNAL, &key).await {
        if let Err(err) = kv.delete(bucket::EXTERNAL, &key, rev).await {
            log::error!("rollback: failed to delete external index {key}: {err}");
        }
    }
}
