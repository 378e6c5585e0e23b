//! Webhook processor (§4.4): classifies inbound GroupsIO provider webhooks
//! and routes them to the orchestration writers with `source=webhook`, Phase
//! C suppressed, to avoid reflection loops. HMAC verification is delegated
//! to `mailing_list_core::webhook`, grounded on `common/src/api/callback.rs`.

use mailing_list_core::error::CoreError;
use mailing_list_core::model::{DeliveryMode, MailingList, MailingListType, Member, MemberType, ModStatus, Origin, ProviderStatus, Timestamps};
use mailing_list_core::webhook;
use serde::Deserialize;

use crate::state::AppState;
use crate::writers::{ListWriter, MemberWriter, ServiceWriter, WriteContext};

#[derive(Debug, Deserialize)]
struct MemberInfo {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[allow(dead_code)]
    id: i64,
    action: String,
    #[serde(default)]
    group: Option<i64>,
    #[serde(default)]
    member_info: Option<MemberInfo>,
    #[serde(default)]
    extra: Option<String>,
    #[serde(default)]
    extra_id: Option<i64>,
}

pub struct WebhookProcessor<'a> {
    state: &'a AppState,
}

impl<'a> WebhookProcessor<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// Verifies `signature_hex` against `raw_body` and, if valid, parses and
    /// routes the webhook. Callers surface `Validation` as 400 per §6
    /// ("requires `x-groupsio-signature` header").
    pub async fn process(&self, raw_body: &[u8], signature_hex: &str) -> Result<(), CoreError> {
        if !webhook::verify(&self.state.webhook_secret, raw_body, signature_hex) {
            return Err(CoreError::validation("x-groupsio-signature", "signature verification failed"));
        }

        let payload: WebhookPayload = serde_json::from_slice(raw_body)?;
        match payload.action.as_str() {
            "created_subgroup" => self.adopt_created_subgroup(payload).await,
            "deleted_subgroup" => self.handle_deleted_subgroup(payload).await,
            "added_member" => self.handle_added_member(payload).await,
            "removed_member" | "ban_members" => self.handle_removed_member(payload).await,
            other => Err(CoreError::validation("action", format!("unsupported webhook action '{other}'"))),
        }
    }

    async fn adopt_created_subgroup(&self, payload: WebhookPayload) -> Result<(), CoreError> {
        let parent_group_id = payload
            .group
            .ok_or_else(|| CoreError::validation("group", "required for created_subgroup"))?;
        let subgroup_id = payload
            .extra_id
            .ok_or_else(|| CoreError::validation("extra_id", "required for created_subgroup"))?;
        let group_name = payload
            .extra
            .ok_or_else(|| CoreError::validation("extra", "required for created_subgroup"))?;

        let service_writer = ServiceWriter::new(self.state);
        let Some(service_uid) = service_writer.find_by_group_id(parent_group_id).await? else {
            // §4.4: "a subgroup under an unmanaged group" — log and ACK.
            log::warn!("created_subgroup for unmanaged parent group {parent_group_id}, ignoring");
            return Ok(());
        };
        let Some((service, _)) = service_writer.get(&service_uid).await? else {
            log::warn!("service {service_uid} indexed by group {parent_group_id} no longer exists, ignoring");
            return Ok(());
        };

        let list = MailingList {
            uid: uuid::Uuid::new_v4().to_string(),
            group_name: group_name.clone(),
            public: true,
            list_type: MailingListType::DiscussionOpen,
            description: format!("Adopted from provider subgroup {subgroup_id}."),
            title: group_name,
            subject_tag: None,
            service_uid: service.uid.clone(),
            project_uid: service.project_uid.clone(),
            committee_bindings: Vec::new(),
            writers: Vec::new(),
            auditors: Vec::new(),
            provider_subgroup_id: Some(subgroup_id),
            subscriber_count: 0,
            timestamps: Timestamps::new_now(),
            source: Origin::Webhook,
            revision: None,
        };

        ListWriter::new(self.state).create(list, &WriteContext::default()).await?;
        Ok(())
    }

    async fn handle_deleted_subgroup(&self, payload: WebhookPayload) -> Result<(), CoreError> {
        let subgroup_id = payload
            .extra_id
            .ok_or_else(|| CoreError::validation("extra_id", "required for deleted_subgroup"))?;
        let list_writer = ListWriter::new(self.state);
        let Some(list_uid) = list_writer.find_by_subgroup_id(subgroup_id).await? else {
            log::warn!("deleted_subgroup for unknown subgroup {subgroup_id}, ignoring");
            return Ok(());
        };
        list_writer.delete_by_uid_best_effort(&list_uid).await
    }

    async fn handle_added_member(&self, payload: WebhookPayload) -> Result<(), CoreError> {
        let subgroup_id = payload
            .extra_id
            .ok_or_else(|| CoreError::validation("extra_id", "required for added_member"))?;
        let member_info = payload
            .member_info
            .ok_or_else(|| CoreError::validation("member_info.email", "required for added_member"))?;
        let email = member_info
            .email
            .ok_or_else(|| CoreError::validation("member_info.email", "required for added_member"))?;

        let list_writer = ListWriter::new(self.state);
        let Some(list_uid) = list_writer.find_by_subgroup_id(subgroup_id).await? else {
            log::warn!("added_member for unknown subgroup {subgroup_id}, ignoring");
            return Ok(());
        };

        let member_writer = MemberWriter::new(self.state);
        if member_writer.find_by_list_and_email(&list_uid, &email).await?.is_some() {
            // §4.4: "idempotent member creation... If already present by email, no-op."
            return Ok(());
        }

        let member = Member {
            uid: uuid::Uuid::new_v4().to_string(),
            list_uid,
            provider_member_id: member_info.id,
            provider_group_id: Some(subgroup_id),
            email,
            first_name: None,
            last_name: None,
            organization: None,
            job_title: None,
            member_type: MemberType::Direct,
            delivery_mode: DeliveryMode::Individual,
            mod_status: ModStatus::None,
            provider_status: ProviderStatus::Normal,
            timestamps: Timestamps::new_now(),
            source: Origin::Webhook,
            revision: None,
        };
        member_writer.create(member, &WriteContext::default()).await?;
        Ok(())
    }

    async fn handle_removed_member(&self, payload: WebhookPayload) -> Result<(), CoreError> {
        let provider_member_id = payload
            .member_info
            .and_then(|info| info.id)
            .ok_or_else(|| CoreError::validation("member_info.id", "required for removed_member/ban_members"))?;

        let member_writer = MemberWriter::new(self.state);
        let Some(member_uid) = member_writer.find_by_provider_id(provider_member_id).await? else {
            log::warn!("removed_member/ban_members for unknown provider member {provider_member_id}, ignoring");
            return Ok(());
        };
        member_writer.delete_by_uid_best_effort(&member_uid).await
    }
}
