use mailing_list_core::bus::{subject, AccessEnvelope, IndexerAction, IndexerEnvelope};
use mailing_list_core::error::CoreError;
use mailing_list_core::model::{Service, ServiceType};
use mailing_list_core::provider::CreateGroupRequest;
use mailing_list_core::retry::{retry_with_backoff, BackoffConfig};
use mailing_list_core::storage::{
    bucket, list_children, reserve_uniqueness, EntityStore,
};

use super::families::{LIST_BY_SERVICE, SERVICE_BY_GROUP};
use super::{wrap_provider_error, UniquenessRollback, WriteContext};
use crate::state::AppState;

/// Five-phase writer for `Service` (§4.2, §3 "Service").
pub struct ServiceWriter<'a> {
    state: &'a AppState,
}

impl<'a> ServiceWriter<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    fn store(&self) -> EntityStore<'_> {
        EntityStore::new(self.state.kv.as_ref(), bucket::SERVICE)
    }

    /// Refreshes the cached project slug/name through the entity-attribute
    /// reader (§3 "project linkage (UID + cached slug/name)"). For a primary
    /// service the group-name is always the project slug (§8 scenario 1).
    async fn resolve_project_linkage(&self, service: &mut Service) -> Result<(), CoreError> {
        if !service.source.calls_provider() {
            return Ok(());
        }
        let slug = self.state.entity_attributes.project_slug(&service.project_uid).await?;
        let name = self.state.entity_attributes.project_name(&service.project_uid).await?;
        if service.service_type == ServiceType::Primary {
            service.group_name = slug.clone();
        }
        service.project_slug = slug;
        service.project_name = name;
        Ok(())
    }

    pub async fn create(&self, mut service: Service, ctx: &WriteContext) -> Result<Service, CoreError> {
        // Phase A — validate.
        service.validate()?;
        self.resolve_project_linkage(&mut service).await?;

        // Phase B — uniqueness reservation.
        let mut rollback = UniquenessRollback::default();
        let index_key = service.index_key();
        reserve_uniqueness(self.state.kv.as_ref(), &index_key, &service.uid)
            .await
            .map_err(|_| {
                CoreError::conflict(format!(
                    "a service of this type already exists for project {}",
                    service.project_uid
                ))
            })?;
        rollback.record(index_key);

        // Phase C — external provider call.
        if service.source.calls_provider() {
            let provider = self.state.provider.clone();
            let group_name = service.group_name.clone();
            let public = service.public;
            let owners = service.owners.clone();
            let created = retry_with_backoff(
                BackoffConfig::provider(),
                move || {
                    let provider = provider.clone();
                    let req = CreateGroupRequest {
                        group_name: group_name.clone(),
                        public,
                        owners: owners.clone(),
                    };
                    async move { provider.create_group(req).await }
                },
                || std::future::pending(),
            )
            .await;
            match created {
                Ok(group_id) => service.external_group_id = Some(group_id.0),
                Err(err) => {
                    rollback.rollback(self.state.kv.as_ref()).await;
                    return Err(wrap_provider_error(err));
                }
            }
        }

        // Phase D — persist.
        let rev = match self.store().create(&service.uid, &service).await {
            Ok(rev) => rev,
            Err(err) => {
                rollback.rollback(self.state.kv.as_ref()).await;
                if service.source.calls_provider() {
                    if let Some(group_id) = service.external_group_id {
                        if let Err(compensating) = self.state.provider.delete_group(group_id).await {
                            log::error!("rollback: compensating delete_group({group_id}) failed: {compensating}");
                        }
                    }
                }
                return Err(err);
            }
        };
        service.revision = Some(rev);

        // Phase E — indices & publication.
        if let Some(group_id) = service.external_group_id {
            if let Err(err) = mailing_list_core::storage::put_external_index(
                self.state.kv.as_ref(),
                SERVICE_BY_GROUP,
                &group_id.to_string(),
                &service.uid,
            )
            .await
            {
                log::error!("failed to index service {} by group {group_id}: {err}", service.uid);
            }
        }
        self.publish(&service, IndexerAction::Created, ctx).await;

        Ok(service)
    }

    pub async fn update(
        &self,
        uid: &str,
        mut new_service: Service,
        expected_rev: u64,
        ctx: &WriteContext,
    ) -> Result<Service, CoreError> {
        new_service.validate()?;
        self.resolve_project_linkage(&mut new_service).await?;
        let (current, current_rev) = self
            .store()
            .get::<Service>(uid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("service {uid}")))?;
        current.check_immutable_fields(&new_service)?;

        if current_rev != expected_rev {
            return Err(CoreError::conflict(format!(
                "revision mismatch: expected {expected_rev}, got {current_rev}"
            )));
        }

        if current.source.calls_provider() {
            if let Some(group_id) = current.external_group_id {
                if current.owners != new_service.owners {
                    self.state
                        .provider
                        .update_group(group_id, new_service.owners.clone())
                        .await
                        .map_err(wrap_provider_error)?;
                }
            }
            new_service.external_group_id = current.external_group_id;
        }

        let rev = self.store().update(uid, &new_service, expected_rev).await?;
        new_service.revision = Some(rev);
        self.publish(&new_service, IndexerAction::Updated, ctx).await;
        Ok(new_service)
    }

    pub async fn delete(&self, uid: &str, expected_rev: u64) -> Result<(), CoreError> {
        let (service, current_rev) = self
            .store()
            .get::<Service>(uid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("service {uid}")))?;

        if current_rev != expected_rev {
            return Err(CoreError::conflict(format!(
                "revision mismatch: expected {expected_rev}, got {current_rev}"
            )));
        }

        // §4.2 "Service/list deletion dependency rule": no lists may reference this service.
        let dependents = list_children(self.state.kv.as_ref(), LIST_BY_SERVICE, uid).await?;
        if !dependents.is_empty() {
            return Err(CoreError::conflict(format!(
                "service {uid} still has {} mailing list(s)",
                dependents.len()
            )));
        }

        self.store().delete(uid, expected_rev).await?;

        if service.source.calls_provider() {
            if let Some(group_id) = service.external_group_id {
                if let Err(err) = self.state.provider.delete_group(group_id).await {
                    log::error!("provider delete_group({group_id}) failed for service {uid}: {err}");
                }
            }
        }
        if let Some(group_id) = service.external_group_id {
            mailing_list_core::storage::delete_external_index(
                self.state.kv.as_ref(),
                SERVICE_BY_GROUP,
                &group_id.to_string(),
            )
            .await;
        }
        mailing_list_core::storage::release_uniqueness(self.state.kv.as_ref(), &service.index_key()).await;

        let envelope = AccessEnvelope {
            uid: uid.to_string(),
            object_type: "groupsio_service".to_string(),
            public: service.public,
            relations: Default::default(),
            references: Default::default(),
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_access(subject::DELETE_ALL_ACCESS_SERVICE, &envelope)
            .await
        {
            log::error!("failed to publish delete-all-access for service {uid}: {err}");
        }

        Ok(())
    }

    async fn publish(&self, service: &Service, action: IndexerAction, ctx: &WriteContext) {
        let data = match serde_json::to_value(service) {
            Ok(value) => value,
            Err(err) => {
                log::error!("failed to marshal service {} for indexing: {err}", service.uid);
                return;
            }
        };
        let envelope = IndexerEnvelope {
            action,
            headers: ctx.headers.clone(),
            data,
            tags: service.tags(),
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_indexer(subject::INDEX_SERVICE, &envelope)
            .await
        {
            log::error!("failed to publish indexer envelope for service {}: {err}", service.uid);
        }

        let mut relations = std::collections::HashMap::new();
        relations.insert("writer".to_string(), service.writers.clone());
        relations.insert("auditor".to_string(), service.auditors.clone());
        let mut references = std::collections::HashMap::new();
        references.insert("project".to_string(), service.project_uid.clone());
        let access = AccessEnvelope {
            uid: service.uid.clone(),
            object_type: "groupsio_service".to_string(),
            public: service.public,
            relations,
            references,
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_access(subject::UPDATE_ACCESS_SERVICE, &access)
            .await
        {
            log::error!("failed to publish access envelope for service {}: {err}", service.uid);
        }
    }
}

impl<'a> ServiceWriter<'a> {
    /// Resolves the UID of the service owning a provider group ID, used by
    /// the webhook processor's `created_subgroup` route to find the parent
    /// (§4.4 "find parent service by parent-group-ID").
    pub async fn find_by_group_id(&self, group_id: i64) -> Result<Option<String>, CoreError> {
        mailing_list_core::storage::lookup_external_index(
            self.state.kv.as_ref(),
            SERVICE_BY_GROUP,
            &group_id.to_string(),
        )
        .await
    }

    pub async fn get(&self, uid: &str) -> Result<Option<(Service, u64)>, CoreError> {
        self.store().get::<Service>(uid).await
    }
}
