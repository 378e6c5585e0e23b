//! Committee-event consumer (§4.3): queue-subscribed handler translating
//! committee member deltas into list-member mutations. Grounded on the
//! fresh-context-per-message + pre-check-shutdown pattern described for
//! `daemon`'s subscription handlers (§9 "Coroutine/async control flow") and
//! the retry/backoff shape of `daemon/src/a2a/notify.rs`.

use std::time::Duration;

use mailing_list_core::bus::{subject, Message};
use mailing_list_core::model::{CommitteeBinding, MailingList, VotingStatus};
use serde::Deserialize;
use tokio::sync::watch;

use crate::state::AppState;
use crate::writers::{families::LIST_BY_COMMITTEE, ListWriter, MemberWriter, WriteContext};

const MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, Clone)]
struct MemberPayload {
    email: String,
    voting_status: VotingStatus,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    organization: Option<String>,
    #[serde(default)]
    job_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedEnvelope {
    committee_uid: String,
    member: MemberPayload,
}

#[derive(Debug, Deserialize)]
struct DeletedEnvelope {
    committee_uid: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct UpdatedEnvelope {
    committee_uid: String,
    old: MemberPayload,
    new: MemberPayload,
}

pub struct CommitteeConsumer {
    state: AppState,
}

impl CommitteeConsumer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Subscribes to the three committee-event subjects on the shared queue
    /// group and drives them until `shutdown` reports true (§4.3, §5).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), mailing_list_core::error::CoreError> {
        let mut created_rx = self
            .state
            .bus
            .subscribe_queue(subject::COMMITTEE_MEMBER_CREATED, subject::QUEUE_GROUP)
            .await?;
        let mut deleted_rx = self
            .state
            .bus
            .subscribe_queue(subject::COMMITTEE_MEMBER_DELETED, subject::QUEUE_GROUP)
            .await?;
        let mut updated_rx = self
            .state
            .bus
            .subscribe_queue(subject::COMMITTEE_MEMBER_UPDATED, subject::QUEUE_GROUP)
            .await?;

        loop {
            tokio::select! {
                Some(msg) = created_rx.recv() => {
                    // §4.3 step 1: a shutdown already in progress NAKs
                    // without starting work, so redelivery falls to another
                    // instance or a post-restart retry.
                    if *shutdown.borrow() {
                        msg.nak();
                        continue;
                    }
                    let payload = msg.payload.clone();
                    let outcome = tokio::time::timeout(MESSAGE_TIMEOUT, self.handle_created(payload)).await;
                    ack_or_nak(msg, outcome);
                }
                Some(msg) = deleted_rx.recv() => {
                    if *shutdown.borrow() {
                        msg.nak();
                        continue;
                    }
                    let payload = msg.payload.clone();
                    let outcome = tokio::time::timeout(MESSAGE_TIMEOUT, self.handle_deleted(payload)).await;
                    ack_or_nak(msg, outcome);
                }
                Some(msg) = updated_rx.recv() => {
                    if *shutdown.borrow() {
                        msg.nak();
                        continue;
                    }
                    let payload = msg.payload.clone();
                    let outcome = tokio::time::timeout(MESSAGE_TIMEOUT, self.handle_updated(payload)).await;
                    ack_or_nak(msg, outcome);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                else => break,
            }
        }
        Ok(())
    }

    async fn bound_lists(&self, committee_uid: &str) -> Result<Vec<(MailingList, CommitteeBinding)>, mailing_list_core::error::CoreError> {
        let list_writer = ListWriter::new(&self.state);
        let uids = mailing_list_core::storage::list_children(self.state.kv.as_ref(), LIST_BY_COMMITTEE, committee_uid).await?;
        let mut out = Vec::new();
        for uid in uids {
            let Some((list, _)) = list_writer.get(&uid).await? else {
                continue;
            };
            if let Some(binding) = list.committee_bindings.iter().find(|b| b.committee_uid == committee_uid).cloned() {
                out.push((list, binding));
            }
        }
        Ok(out)
    }

    async fn handle_created(&self, payload: Vec<u8>) -> Result<(), mailing_list_core::error::CoreError> {
        let envelope: CreatedEnvelope = serde_json::from_slice(&payload)?;
        let ctx = WriteContext::default();
        let member_writer = MemberWriter::new(&self.state);
        let lists = self.bound_lists(&envelope.committee_uid).await?;

        // §4.3 "pulls the full roster ... heals state after missed events".
        let roster = self.state.entity_attributes.committee_members(&envelope.committee_uid).await?;

        for (list, binding) in &lists {
            for member in &roster {
                if !binding.admits(member.voting_status) {
                    continue;
                }
                if member_writer.find_by_list_and_email(&list.uid, &member.email).await?.is_some() {
                    continue;
                }
                member_writer
                    .create_for_committee(
                        &list.uid,
                        member.email.clone(),
                        member.first_name.clone(),
                        member.last_name.clone(),
                        member.organization.clone(),
                        member.job_title.clone(),
                        &ctx,
                    )
                    .await?;
            }
        }

        // The event's own member may not yet be reflected in a stale roster
        // reply; handle it directly too, idempotently.
        for (list, binding) in &lists {
            if !binding.admits(envelope.member.voting_status) {
                continue;
            }
            if member_writer.find_by_list_and_email(&list.uid, &envelope.member.email).await?.is_some() {
                continue;
            }
            member_writer
                .create_for_committee(
                    &list.uid,
                    envelope.member.email.clone(),
                    envelope.member.first_name.clone(),
                    envelope.member.last_name.clone(),
                    envelope.member.organization.clone(),
                    envelope.member.job_title.clone(),
                    &ctx,
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_deleted(&self, payload: Vec<u8>) -> Result<(), mailing_list_core::error::CoreError> {
        let envelope: DeletedEnvelope = serde_json::from_slice(&payload)?;
        let member_writer = MemberWriter::new(&self.state);
        let lists = self.bound_lists(&envelope.committee_uid).await?;
        if log::log_enabled!(log::Level::Debug) {
            let committee_name = self
                .state
                .entity_attributes
                .committee_name(&envelope.committee_uid)
                .await
                .unwrap_or_else(|_| envelope.committee_uid.clone());
            log::debug!("removing {} from {} list(s) bound to committee '{committee_name}'", envelope.email, lists.len());
        }
        for (list, _binding) in &lists {
            member_writer.delete_by_list_and_email(&list.uid, &envelope.email).await?;
        }
        Ok(())
    }

    async fn handle_updated(&self, payload: Vec<u8>) -> Result<(), mailing_list_core::error::CoreError> {
        let envelope: UpdatedEnvelope = serde_json::from_slice(&payload)?;
        let ctx = WriteContext::default();
        let member_writer = MemberWriter::new(&self.state);
        let lists = self.bound_lists(&envelope.committee_uid).await?;

        for (list, binding) in &lists {
            let was_in = binding.admits(envelope.old.voting_status);
            let now_in = binding.admits(envelope.new.voting_status);
            match (was_in, now_in) {
                (false, true) => {
                    member_writer
                        .create_for_committee(
                            &list.uid,
                            envelope.new.email.clone(),
                            envelope.new.first_name.clone(),
                            envelope.new.last_name.clone(),
                            envelope.new.organization.clone(),
                            envelope.new.job_title.clone(),
                            &ctx,
                        )
                        .await?;
                }
                (true, false) => {
                    member_writer.delete_by_list_and_email(&list.uid, &envelope.old.email).await?;
                }
                (true, true) => {
                    member_writer
                        .update_committee_profile(
                            &list.uid,
                            &envelope.new.email,
                            envelope.new.first_name.clone(),
                            envelope.new.last_name.clone(),
                            envelope.new.organization.clone(),
                            envelope.new.job_title.clone(),
                            &ctx,
                        )
                        .await?;
                }
                (false, false) => {}
            }
        }
        Ok(())
    }
}

fn ack_or_nak(
    msg: Message,
    outcome: Result<Result<(), mailing_list_core::error::CoreError>, tokio::time::error::Elapsed>,
) {
    match outcome {
        Ok(Ok(())) => msg.ack(),
        Ok(Err(err)) => {
            log::warn!("committee event processing failed, nak'ing for redelivery: {err}");
            msg.nak();
        }
        Err(_) => {
            log::warn!("committee event processing timed out after {MESSAGE_TIMEOUT:?}, nak'ing");
            msg.nak();
        }
    }
}
