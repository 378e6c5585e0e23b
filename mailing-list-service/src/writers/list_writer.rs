use mailing_list_core::bus::{subject, AccessEnvelope, IndexerAction, IndexerEnvelope};
use mailing_list_core::error::CoreError;
use mailing_list_core::model::{MailingList, Service};
use mailing_list_core::provider::{CreateSubgroupRequest, UpdateSubgroupRequest};
use mailing_list_core::retry::{retry_with_backoff, BackoffConfig};
use mailing_list_core::storage::{
    bucket, create_index_edge, delete_external_index, delete_index_edge, list_children,
    lookup_uniqueness_owner, put_external_index, release_uniqueness, reserve_uniqueness, EntityStore,
};

use super::families::{LIST_BY_COMMITTEE, LIST_BY_PROJECT, LIST_BY_SERVICE, LIST_BY_SUBGROUP, MEMBER_BY_LIST};
use super::{wrap_provider_error, MemberWriter, UniquenessRollback, WriteContext};
use crate::state::AppState;

/// Five-phase writer for `MailingList` (§4.2, §3 "MailingList").
pub struct ListWriter<'a> {
    state: &'a AppState,
}

impl<'a> ListWriter<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    fn store(&self) -> EntityStore<'_> {
        EntityStore::new(self.state.kv.as_ref(), bucket::MAILING_LIST)
    }

    async fn parent_service(&self, service_uid: &str) -> Result<Service, CoreError> {
        let store = EntityStore::new(self.state.kv.as_ref(), bucket::SERVICE);
        let (service, _) = store
            .get::<Service>(service_uid)
            .await?
            .ok_or_else(|| CoreError::validation("service_uid", "no such service"))?;
        Ok(service)
    }

    pub async fn create(&self, mut list: MailingList, ctx: &WriteContext) -> Result<MailingList, CoreError> {
        list.validate()?;
        let service = self.parent_service(&list.service_uid).await?;

        let mut rollback = UniquenessRollback::default();
        let index_key = list.index_key();
        reserve_uniqueness(self.state.kv.as_ref(), &index_key, &list.uid)
            .await
            .map_err(|_| CoreError::conflict(format!("a mailing list named '{}' already exists", list.group_name)))?;
        rollback.record(index_key);

        if list.source.calls_provider() {
            let parent_group_id = service
                .external_group_id
                .ok_or_else(|| CoreError::unavailable("parent service has no provider group yet"))?;
            let provider = self.state.provider.clone();
            let group_name = list.group_name.clone();
            let title = list.title.clone();
            let description = list.description.clone();
            let public = list.public;
            let created = retry_with_backoff(
                BackoffConfig::provider(),
                move || {
                    let provider = provider.clone();
                    let req = CreateSubgroupRequest {
                        parent_group_id,
                        group_name: group_name.clone(),
                        title: title.clone(),
                        description: description.clone(),
                        public,
                    };
                    async move { provider.create_subgroup(req).await }
                },
                || std::future::pending(),
            )
            .await;
            match created {
                Ok(subgroup_id) => list.provider_subgroup_id = Some(subgroup_id.0),
                Err(err) => {
                    rollback.rollback(self.state.kv.as_ref()).await;
                    return Err(wrap_provider_error(err));
                }
            }
        }

        let rev = match self.store().create(&list.uid, &list).await {
            Ok(rev) => rev,
            Err(err) => {
                rollback.rollback(self.state.kv.as_ref()).await;
                if let Some(subgroup_id) = list.provider_subgroup_id {
                    if let Err(compensating) = self.state.provider.delete_subgroup(subgroup_id).await {
                        log::error!("rollback: compensating delete_subgroup({subgroup_id}) failed: {compensating}");
                    }
                }
                return Err(err);
            }
        };
        list.revision = Some(rev);

        self.index(&list).await;
        self.publish(&list, None, IndexerAction::Created, ctx).await;

        Ok(list)
    }

    pub async fn update(
        &self,
        uid: &str,
        mut new_list: MailingList,
        expected_rev: u64,
        ctx: &WriteContext,
    ) -> Result<MailingList, CoreError> {
        new_list.validate()?;
        let (current, current_rev) = self
            .store()
            .get::<MailingList>(uid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("mailing list {uid}")))?;
        current.check_immutable_fields(&new_list)?;

        if current_rev != expected_rev {
            return Err(CoreError::conflict(format!(
                "revision mismatch: expected {expected_rev}, got {current_rev}"
            )));
        }

        new_list.provider_subgroup_id = current.provider_subgroup_id;
        new_list.subscriber_count = current.subscriber_count;

        if current.source.calls_provider() {
            if let Some(subgroup_id) = current.provider_subgroup_id {
                if current.title != new_list.title || current.description != new_list.description {
                    self.state
                        .provider
                        .update_subgroup(UpdateSubgroupRequest {
                            subgroup_id,
                            title: Some(new_list.title.clone()),
                            description: Some(new_list.description.clone()),
                        })
                        .await
                        .map_err(wrap_provider_error)?;
                }
            }
        }

        let rev = self.store().update(uid, &new_list, expected_rev).await?;
        new_list.revision = Some(rev);

        self.reindex_committee_bindings(&current, &new_list).await;
        self.publish(&new_list, Some(&current), IndexerAction::Updated, ctx).await;
        Ok(new_list)
    }

    pub async fn delete(&self, uid: &str, expected_rev: u64) -> Result<(), CoreError> {
        let (list, current_rev) = self
            .store()
            .get::<MailingList>(uid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("mailing list {uid}")))?;

        if current_rev != expected_rev {
            return Err(CoreError::conflict(format!(
                "revision mismatch: expected {expected_rev}, got {current_rev}"
            )));
        }

        // §4.2 "Service/list deletion dependency rule": deleting a list cascades
        // member deletion on the API path.
        let member_uids = list_children(self.state.kv.as_ref(), MEMBER_BY_LIST, uid).await?;
        let member_writer = MemberWriter::new(self.state);
        for member_uid in member_uids {
            if let Err(err) = member_writer.delete_by_uid_best_effort(&member_uid).await {
                log::error!("cascade: failed to delete member {member_uid} of list {uid}: {err}");
            }
        }

        self.store().delete(uid, expected_rev).await?;

        if list.source.calls_provider() {
            if let Some(subgroup_id) = list.provider_subgroup_id {
                if let Err(err) = self.state.provider.delete_subgroup(subgroup_id).await {
                    log::error!("provider delete_subgroup({subgroup_id}) failed for list {uid}: {err}");
                }
            }
        }

        delete_index_edge(self.state.kv.as_ref(), LIST_BY_SERVICE, &list.service_uid, uid).await;
        delete_index_edge(self.state.kv.as_ref(), LIST_BY_PROJECT, &list.project_uid, uid).await;
        for binding in &list.committee_bindings {
            delete_index_edge(self.state.kv.as_ref(), LIST_BY_COMMITTEE, &binding.committee_uid, uid).await;
        }
        if let Some(subgroup_id) = list.provider_subgroup_id {
            delete_external_index(self.state.kv.as_ref(), LIST_BY_SUBGROUP, &subgroup_id.to_string()).await;
        }
        release_uniqueness(self.state.kv.as_ref(), &list.index_key()).await;

        let envelope = AccessEnvelope {
            uid: uid.to_string(),
            object_type: "groupsio_mailing_list".to_string(),
            public: list.public,
            relations: Default::default(),
            references: Default::default(),
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_access(subject::DELETE_ALL_ACCESS_MAILING_LIST, &envelope)
            .await
        {
            log::error!("failed to publish delete-all-access for list {uid}: {err}");
        }

        Ok(())
    }

    pub async fn get(&self, uid: &str) -> Result<Option<(MailingList, u64)>, CoreError> {
        self.store().get::<MailingList>(uid).await
    }

    /// Resolves the UID owning a uniqueness hash, used by the webhook
    /// processor's `created_subgroup` adoption path (§4.3).
    pub async fn find_by_index_key(&self, index_key_hash: &str) -> Result<Option<String>, CoreError> {
        lookup_uniqueness_owner(self.state.kv.as_ref(), index_key_hash).await
    }

    /// Resolves the UID of the list owning a provider subgroup ID, used by
    /// the `deleted_subgroup`/`added_member` webhook routes (§4.4).
    pub async fn find_by_subgroup_id(&self, subgroup_id: i64) -> Result<Option<String>, CoreError> {
        mailing_list_core::storage::lookup_external_index(
            self.state.kv.as_ref(),
            LIST_BY_SUBGROUP,
            &subgroup_id.to_string(),
        )
        .await
    }

    /// Deletes a list by UID using its current stored revision, tolerant of
    /// absence. Used by the `deleted_subgroup` webhook route, where no
    /// If-Match revision is available from the caller.
    pub async fn delete_by_uid_best_effort(&self, uid: &str) -> Result<(), CoreError> {
        let Some((_, rev)) = self.store().get::<MailingList>(uid).await? else {
            return Ok(());
        };
        self.delete(uid, rev).await
    }

    async fn index(&self, list: &MailingList) {
        if let Err(err) = create_index_edge(self.state.kv.as_ref(), LIST_BY_SERVICE, &list.service_uid, &list.uid).await {
            log::error!("failed to index list {} under service {}: {err}", list.uid, list.service_uid);
        }
        if let Err(err) = create_index_edge(self.state.kv.as_ref(), LIST_BY_PROJECT, &list.project_uid, &list.uid).await
        {
            log::error!("failed to index list {} under project {}: {err}", list.uid, list.project_uid);
        }
        for binding in &list.committee_bindings {
            if let Err(err) =
                create_index_edge(self.state.kv.as_ref(), LIST_BY_COMMITTEE, &binding.committee_uid, &list.uid).await
            {
                log::error!(
                    "failed to index list {} under committee {}: {err}",
                    list.uid,
                    binding.committee_uid
                );
            }
        }
        if let Some(subgroup_id) = list.provider_subgroup_id {
            if let Err(err) =
                put_external_index(self.state.kv.as_ref(), LIST_BY_SUBGROUP, &subgroup_id.to_string(), &list.uid).await
            {
                log::error!("failed to index list {} by subgroup {subgroup_id}: {err}", list.uid);
            }
        }
    }

    async fn reindex_committee_bindings(&self, current: &MailingList, new_list: &MailingList) {
        let old: std::collections::HashSet<_> = current
            .committee_bindings
            .iter()
            .map(|b| b.committee_uid.clone())
            .collect();
        let new: std::collections::HashSet<_> =
            new_list.committee_bindings.iter().map(|b| b.committee_uid.clone()).collect();
        for removed in old.difference(&new) {
            delete_index_edge(self.state.kv.as_ref(), LIST_BY_COMMITTEE, removed, &new_list.uid).await;
        }
        for added in new.difference(&old) {
            if let Err(err) = create_index_edge(self.state.kv.as_ref(), LIST_BY_COMMITTEE, added, &new_list.uid).await {
                log::error!("failed to index list {} under committee {added}: {err}", new_list.uid);
            }
        }
    }

    async fn publish(&self, list: &MailingList, old: Option<&MailingList>, action: IndexerAction, ctx: &WriteContext) {
        let data = match serde_json::to_value(list) {
            Ok(value) => value,
            Err(err) => {
                log::error!("failed to marshal list {} for indexing: {err}", list.uid);
                return;
            }
        };
        let envelope = IndexerEnvelope {
            action,
            headers: ctx.headers.clone(),
            data,
            tags: list.tags(),
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_indexer(subject::INDEX_MAILING_LIST, &envelope)
            .await
        {
            log::error!("failed to publish indexer envelope for list {}: {err}", list.uid);
        }

        let mut relations = std::collections::HashMap::new();
        relations.insert("writer".to_string(), list.writers.clone());
        relations.insert("auditor".to_string(), list.auditors.clone());
        let mut references = std::collections::HashMap::new();
        references.insert("project".to_string(), list.project_uid.clone());
        references.insert("service".to_string(), list.service_uid.clone());
        let access = AccessEnvelope {
            uid: list.uid.clone(),
            object_type: "groupsio_mailing_list".to_string(),
            public: list.public,
            relations,
            references,
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_access(subject::UPDATE_ACCESS_MAILING_LIST, &access)
            .await
        {
            log::error!("failed to publish access envelope for list {}: {err}", list.uid);
        }

        let subject = match action {
            IndexerAction::Created => subject::MAILING_LIST_CREATED,
            IndexerAction::Updated => subject::MAILING_LIST_UPDATED,
            IndexerAction::Deleted => return,
        };
        let event = match old {
            Some(old) => serde_json::json!({ "old": old, "new": list }),
            None => serde_json::json!(list),
        };
        if let Err(err) = self.state.publisher.publish_domain_event(subject, &event).await {
            log::error!("failed to publish domain event for list {}: {err}", list.uid);
        }
    }
}
