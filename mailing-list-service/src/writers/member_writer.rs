use mailing_list_core::bus::{subject, AccessEnvelope, IndexerAction, IndexerEnvelope};
use mailing_list_core::error::CoreError;
use mailing_list_core::model::{DeliveryMode, MailingList, Member, MemberType, ModStatus, Origin, ProviderStatus};
use mailing_list_core::provider::CreateMemberRequest;
use mailing_list_core::retry::{retry_with_backoff, BackoffConfig};
use mailing_list_core::storage::{
    bucket, delete_external_index, delete_index_edge, lookup_uniqueness_owner, put_external_index,
    release_uniqueness, reserve_uniqueness, EntityStore,
};

use super::families::{MEMBER_BY_LIST, MEMBER_BY_PROVIDER_ID};
use super::{wrap_provider_error, UniquenessRollback, WriteContext};
use crate::state::AppState;

/// Five-phase writer for `Member` (§4.2, §3 "Member").
pub struct MemberWriter<'a> {
    state: &'a AppState,
}

impl<'a> MemberWriter<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    fn store(&self) -> EntityStore<'_> {
        EntityStore::new(self.state.kv.as_ref(), bucket::MEMBER)
    }

    async fn parent_list(&self, list_uid: &str) -> Result<MailingList, CoreError> {
        let store = EntityStore::new(self.state.kv.as_ref(), bucket::MAILING_LIST);
        let (list, _) = store
            .get::<MailingList>(list_uid)
            .await?
            .ok_or_else(|| CoreError::validation("list_uid", "no such mailing list"))?;
        Ok(list)
    }

    pub async fn get(&self, uid: &str) -> Result<Option<(Member, u64)>, CoreError> {
        self.store().get::<Member>(uid).await
    }

    /// Resolves an existing member by (list, email), used by the webhook
    /// processor's idempotent `added_member` path and the committee
    /// consumer's roster diff (§4.3 step 4, §4.4).
    pub async fn find_by_list_and_email(&self, list_uid: &str, email: &str) -> Result<Option<String>, CoreError> {
        let key = Member::derive_index_key(list_uid, email);
        lookup_uniqueness_owner(self.state.kv.as_ref(), &key).await
    }

    /// Builds and creates a committee-sourced member (§4.3 step 4 "create a
    /// member on this list"), idempotent via the caller's
    /// `find_by_list_and_email` pre-check.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_for_committee(
        &self,
        list_uid: &str,
        email: String,
        first_name: Option<String>,
        last_name: Option<String>,
        organization: Option<String>,
        job_title: Option<String>,
        ctx: &WriteContext,
    ) -> Result<Member, CoreError> {
        let member = Member {
            uid: uuid::Uuid::new_v4().to_string(),
            list_uid: list_uid.to_string(),
            provider_member_id: None,
            provider_group_id: None,
            email,
            first_name,
            last_name,
            organization,
            job_title,
            member_type: MemberType::Committee,
            delivery_mode: DeliveryMode::Individual,
            mod_status: ModStatus::None,
            provider_status: ProviderStatus::Pending,
            timestamps: mailing_list_core::model::Timestamps::new_now(),
            source: Origin::Api,
            revision: None,
        };
        self.create(member, ctx).await
    }

    /// Applies a mutable-field profile update to an existing committee
    /// member found by (list, email); a no-op if no such member exists
    /// (§4.3 step 4 "in both → update mutable fields").
    #[allow(clippy::too_many_arguments)]
    pub async fn update_committee_profile(
        &self,
        list_uid: &str,
        email: &str,
        first_name: Option<String>,
        last_name: Option<String>,
        organization: Option<String>,
        job_title: Option<String>,
        ctx: &WriteContext,
    ) -> Result<(), CoreError> {
        let Some(uid) = self.find_by_list_and_email(list_uid, email).await? else {
            return Ok(());
        };
        let Some((mut member, rev)) = self.store().get::<Member>(&uid).await? else {
            return Ok(());
        };
        member.apply_committee_profile_update(first_name, last_name, organization, job_title);
        self.update(&uid, member, rev, ctx).await?;
        Ok(())
    }

    /// Deletes the member identified by (list, email), tolerant of absence
    /// (§4.3 step 4 "was-in, now-out", §4.4 idempotency).
    pub async fn delete_by_list_and_email(&self, list_uid: &str, email: &str) -> Result<(), CoreError> {
        let Some(uid) = self.find_by_list_and_email(list_uid, email).await? else {
            return Ok(());
        };
        self.delete_by_uid_best_effort(&uid).await
    }

    pub async fn find_by_provider_id(&self, provider_member_id: i64) -> Result<Option<String>, CoreError> {
        mailing_list_core::storage::lookup_external_index(
            self.state.kv.as_ref(),
            MEMBER_BY_PROVIDER_ID,
            &provider_member_id.to_string(),
        )
        .await
    }

    pub async fn create(&self, mut member: Member, ctx: &WriteContext) -> Result<Member, CoreError> {
        member.validate()?;
        let list = self.parent_list(&member.list_uid).await?;

        let mut rollback = UniquenessRollback::default();
        let index_key = member.index_key();
        reserve_uniqueness(self.state.kv.as_ref(), &index_key, &member.uid)
            .await
            .map_err(|_| CoreError::conflict(format!("{} is already a member of this list", member.email)))?;
        rollback.record(index_key);

        if member.source.calls_provider() {
            let subgroup_id = list
                .provider_subgroup_id
                .ok_or_else(|| CoreError::unavailable("parent list has no provider subgroup yet"))?;
            let provider = self.state.provider.clone();
            let email = member.email.clone();
            use mailing_list_core::model::ModStatus;
            let moderator = matches!(member.mod_status, ModStatus::Moderator | ModStatus::Owner);
            let created = retry_with_backoff(
                BackoffConfig::provider(),
                move || {
                    let provider = provider.clone();
                    let req = CreateMemberRequest {
                        subgroup_id,
                        email: email.clone(),
                        moderator,
                    };
                    async move { provider.create_member(req).await }
                },
                || std::future::pending(),
            )
            .await;
            match created {
                Ok(member_id) => {
                    member.provider_member_id = Some(member_id.0);
                    member.provider_group_id = Some(subgroup_id);
                }
                Err(err) => {
                    rollback.rollback(self.state.kv.as_ref()).await;
                    return Err(wrap_provider_error(err));
                }
            }
        }

        let rev = match self.store().create(&member.uid, &member).await {
            Ok(rev) => rev,
            Err(err) => {
                rollback.rollback(self.state.kv.as_ref()).await;
                if let (Some(subgroup_id), Some(member_id)) = (member.provider_group_id, member.provider_member_id) {
                    if let Err(compensating) = self.state.provider.delete_member(subgroup_id, member_id).await {
                        log::error!(
                            "rollback: compensating delete_member({subgroup_id},{member_id}) failed: {compensating}"
                        );
                    }
                }
                return Err(err);
            }
        };
        member.revision = Some(rev);

        self.index(&member).await;
        self.publish(&member, IndexerAction::Created, ctx).await;

        Ok(member)
    }

    pub async fn update(
        &self,
        uid: &str,
        mut new_member: Member,
        expected_rev: u64,
        ctx: &WriteContext,
    ) -> Result<Member, CoreError> {
        new_member.validate()?;
        let (current, current_rev) = self
            .store()
            .get::<Member>(uid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("member {uid}")))?;
        current.check_immutable_fields(&new_member)?;

        if current_rev != expected_rev {
            return Err(CoreError::conflict(format!(
                "revision mismatch: expected {expected_rev}, got {current_rev}"
            )));
        }

        new_member.provider_member_id = current.provider_member_id;
        new_member.provider_group_id = current.provider_group_id;

        let rev = self.store().update(uid, &new_member, expected_rev).await?;
        new_member.revision = Some(rev);
        self.publish(&new_member, IndexerAction::Updated, ctx).await;
        Ok(new_member)
    }

    pub async fn delete(&self, uid: &str, expected_rev: u64) -> Result<(), CoreError> {
        let (member, current_rev) = self
            .store()
            .get::<Member>(uid)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("member {uid}")))?;

        if current_rev != expected_rev {
            return Err(CoreError::conflict(format!(
                "revision mismatch: expected {expected_rev}, got {current_rev}"
            )));
        }

        self.store().delete(uid, expected_rev).await?;
        self.finish_delete(member).await;
        Ok(())
    }

    /// Deletes a member by UID using its current stored revision, tolerant of
    /// absence. Used by the list writer's delete-cascade (§4.2 "Service/list
    /// deletion dependency rule") and the webhook/committee consumers, where
    /// no If-Match revision is available from the caller.
    pub async fn delete_by_uid_best_effort(&self, uid: &str) -> Result<(), CoreError> {
        let Some((member, rev)) = self.store().get::<Member>(uid).await? else {
            return Ok(());
        };
        self.store().delete(uid, rev).await?;
        self.finish_delete(member).await;
        Ok(())
    }

    async fn finish_delete(&self, member: Member) {
        if member.source.calls_provider() {
            if let (Some(subgroup_id), Some(member_id)) = (member.provider_group_id, member.provider_member_id) {
                if let Err(err) = self.state.provider.delete_member(subgroup_id, member_id).await {
                    log::error!(
                        "provider delete_member({subgroup_id},{member_id}) failed for member {}: {err}",
                        member.uid
                    );
                }
            }
        }
        delete_index_edge(self.state.kv.as_ref(), MEMBER_BY_LIST, &member.list_uid, &member.uid).await;
        if let Some(member_id) = member.provider_member_id {
            delete_external_index(self.state.kv.as_ref(), MEMBER_BY_PROVIDER_ID, &member_id.to_string()).await;
        }
        release_uniqueness(self.state.kv.as_ref(), &member.index_key()).await;

        let envelope = AccessEnvelope {
            uid: member.uid.clone(),
            object_type: "groupsio_member".to_string(),
            public: false,
            relations: Default::default(),
            references: Default::default(),
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_access(subject::DELETE_ALL_ACCESS_MEMBER, &envelope)
            .await
        {
            log::error!("failed to publish delete-all-access for member {}: {err}", member.uid);
        }
        if let Err(err) = self
            .state
            .publisher
            .publish_domain_event(subject::REMOVE_MEMBER, &serde_json::json!({"list_uid": member.list_uid, "email": member.email}))
            .await
        {
            log::error!("failed to publish remove_member event for member {}: {err}", member.uid);
        }
    }

    async fn index(&self, member: &Member) {
        if let Err(err) = mailing_list_core::storage::create_index_edge(
            self.state.kv.as_ref(),
            MEMBER_BY_LIST,
            &member.list_uid,
            &member.uid,
        )
        .await
        {
            log::error!(
                "failed to index member {} under list {}: {err}",
                member.uid,
                member.list_uid
            );
        }
        if let Some(member_id) = member.provider_member_id {
            if let Err(err) =
                put_external_index(self.state.kv.as_ref(), MEMBER_BY_PROVIDER_ID, &member_id.to_string(), &member.uid)
                    .await
            {
                log::error!("failed to index member {} by provider id {member_id}: {err}", member.uid);
            }
        }
    }

    async fn publish(&self, member: &Member, action: IndexerAction, ctx: &WriteContext) {
        let data = match serde_json::to_value(member) {
            Ok(value) => value,
            Err(err) => {
                log::error!("failed to marshal member {} for indexing: {err}", member.uid);
                return;
            }
        };
        let envelope = IndexerEnvelope {
            action,
            headers: ctx.headers.clone(),
            data,
            tags: member.tags(),
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_indexer(subject::INDEX_MEMBER, &envelope)
            .await
        {
            log::error!("failed to publish indexer envelope for member {}: {err}", member.uid);
        }

        let access = AccessEnvelope {
            uid: member.uid.clone(),
            object_type: "groupsio_member".to_string(),
            public: false,
            relations: Default::default(),
            references: std::collections::HashMap::from([("mailing_list".to_string(), member.list_uid.clone())]),
        };
        if let Err(err) = self
            .state
            .publisher
            .publish_access(subject::UPDATE_ACCESS_MEMBER, &access)
            .await
        {
            log::error!("failed to publish access envelope for member {}: {err}", member.uid);
        }

        if matches!(action, IndexerAction::Created) {
            if let Err(err) = self
                .state
                .publisher
                .publish_domain_event(subject::PUT_MEMBER, &serde_json::json!(member))
                .await
            {
                log::error!("failed to publish put_member event for member {}: {err}", member.uid);
            }
        }
    }
}
