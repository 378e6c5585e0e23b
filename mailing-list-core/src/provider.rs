//! Provider client interface (§2 "Provider client interface", §4.2 Phase C).
//! The GroupsIO HTTP client's transport-level concerns are out of scope
//! (§1) — the orchestration core only consumes this trait. A mock
//! implementation is provided for tests, grounded on the capability-trait +
//! mock-variant split called out in §9 ("Cyclic/inheritance-like
//! collaborators... Mock variants should satisfy the same capability
//! interfaces").

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub group_name: String,
    pub public: bool,
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubgroupRequest {
    pub parent_group_id: i64,
    pub group_name: String,
    pub title: String,
    pub description: String,
    pub public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSubgroupRequest {
    pub subgroup_id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemberRequest {
    pub subgroup_id: i64,
    pub email: String,
    pub moderator: bool,
}

/// GroupsIO-side identifiers returned on successful creation (§4.2 Phase C
/// "capture the returned external ID and merge it into the record").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderGroupId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderSubgroupId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderMemberId(pub i64);

/// Provider operations consumed by the orchestration writers (§2, §4.2 Phase
/// C). Errors are pre-classified into the shared taxonomy so the caller's
/// retry loop only needs `CoreError::is_retryable`.
#[async_trait]
pub trait GroupsIoClient: Send + Sync {
    async fn create_group(&self, req: CreateGroupRequest) -> Result<ProviderGroupId, CoreError>;
    async fn update_group(&self, group_id: i64, owners: Vec<String>) -> Result<(), CoreError>;
    async fn delete_group(&self, group_id: i64) -> Result<(), CoreError>;

    async fn create_subgroup(&self, req: CreateSubgroupRequest) -> Result<ProviderSubgroupId, CoreError>;
    async fn update_subgroup(&self, req: UpdateSubgroupRequest) -> Result<(), CoreError>;
    async fn delete_subgroup(&self, subgroup_id: i64) -> Result<(), CoreError>;

    async fn create_member(&self, req: CreateMemberRequest) -> Result<ProviderMemberId, CoreError>;
    async fn delete_member(&self, subgroup_id: i64, member_id: i64) -> Result<(), CoreError>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::Mutex;

    /// Records calls for assertions and hands out incrementing fake IDs.
    /// Tests can queue a `force_next_error` to exercise rollback paths
    /// (§4.2 Phase C "Provider failures... roll back Phase B").
    #[derive(Default)]
    pub struct MockGroupsIoClient {
        next_id: AtomicI64,
        pub calls: Mutex<Vec<String>>,
        pub force_next_error: Mutex<Option<CoreError>>,
    }

    impl MockGroupsIoClient {
        pub fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1),
                calls: Mutex::new(Vec::new()),
                force_next_error: Mutex::new(None),
            }
        }

        async fn maybe_fail(&self) -> Result<(), CoreError> {
            if let Some(err) = self.force_next_error.lock().await.take() {
                return Err(err);
            }
            Ok(())
        }

        fn next(&self) -> i64 {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GroupsIoClient for MockGroupsIoClient {
        async fn create_group(&self, req: CreateGroupRequest) -> Result<ProviderGroupId, CoreError> {
            self.calls.lock().await.push(format!("create_group:{}", req.group_name));
            self.maybe_fail().await?;
            Ok(ProviderGroupId(self.next()))
        }

        async fn update_group(&self, group_id: i64, _owners: Vec<String>) -> Result<(), CoreError> {
            self.calls.lock().await.push(format!("update_group:{group_id}"));
            self.maybe_fail().await
        }

        async fn delete_group(&self, group_id: i64) -> Result<(), CoreError> {
            self.calls.lock().await.push(format!("delete_group:{group_id}"));
            self.maybe_fail().await
        }

        async fn create_subgroup(&self, req: CreateSubgroupRequest) -> Result<ProviderSubgroupId, CoreError> {
            self.calls
                .lock()
                .await
                .push(format!("create_subgroup:{}", req.group_name));
            self.maybe_fail().await?;
            Ok(ProviderSubgroupId(self.next()))
        }

        async fn update_subgroup(&self, req: UpdateSubgroupRequest) -> Result<(), CoreError> {
            self.calls
                .lock()
                .await
                .push(format!("update_subgroup:{}", req.subgroup_id));
            self.maybe_fail().await
        }

        async fn delete_subgroup(&self, subgroup_id: i64) -> Result<(), CoreError> {
            self.calls.lock().await.push(format!("delete_subgroup:{subgroup_id}"));
            self.maybe_fail().await
        }

        async fn create_member(&self, req: CreateMemberRequest) -> Result<ProviderMemberId, CoreError> {
            self.calls.lock().await.push(format!("create_member:{}", req.email));
            self.maybe_fail().await?;
            Ok(ProviderMemberId(self.next()))
        }

        async fn delete_member(&self, subgroup_id: i64, member_id: i64) -> Result<(), CoreError> {
            self.calls
                .lock()
                .await
                .push(format!("delete_member:{subgroup_id}:{member_id}"));
            self.maybe_fail().await
        }
    }
}
