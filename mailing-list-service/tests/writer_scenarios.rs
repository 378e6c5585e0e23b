//! End-to-end scenarios (§8) exercised directly against the orchestration
//! writers, the committee consumer and the webhook processor — the layer
//! where the interesting invariants (rollback completeness, fan-out
//! filtering, webhook adoption) actually live, independent of HTTP framing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mailing_list_core::bus::test_support::InMemoryBus;
use mailing_list_core::bus::subject;
use mailing_list_core::error::CoreError;
use mailing_list_core::model::{
    CommitteeBinding, MailingListType, Origin, Service, ServiceStatus, ServiceType, Timestamps, VotingStatus,
};
use mailing_list_core::model::MailingList;
use mailing_list_core::provider::mock::MockGroupsIoClient;
use mailing_list_core::storage::InMemoryKv;
use mailing_list_service::committee_consumer::CommitteeConsumer;
use mailing_list_service::state::AppState;
use mailing_list_service::webhook_processor::WebhookProcessor;
use mailing_list_service::writers::{ListWriter, MemberWriter, ServiceWriter, WriteContext};
use tokio::sync::watch;

fn formation_service(url_prefix: &str, project_uid: &str) -> Service {
    Service {
        uid: uuid::Uuid::new_v4().to_string(),
        service_type: ServiceType::Formation,
        provider_domain: "groups.io".into(),
        external_group_id: None,
        status: ServiceStatus::Active,
        owners: vec!["owner@example.com".into()],
        url_prefix: Some(url_prefix.into()),
        project_uid: project_uid.into(),
        project_slug: project_uid.to_lowercase(),
        project_name: project_uid.into(),
        group_name: format!("{url_prefix}-root"),
        public: true,
        writers: vec![],
        auditors: vec![],
        last_reviewed: None,
        timestamps: Timestamps::new_now(),
        source: Origin::Api,
        revision: None,
    }
}

fn list_under(service: &Service, group_name: &str) -> MailingList {
    MailingList {
        uid: uuid::Uuid::new_v4().to_string(),
        group_name: group_name.into(),
        public: true,
        list_type: MailingListType::DiscussionOpen,
        description: "Dev discussions here.".into(),
        title: "Dev".into(),
        subject_tag: None,
        service_uid: service.uid.clone(),
        project_uid: service.project_uid.clone(),
        committee_bindings: vec![],
        writers: vec![],
        auditors: vec![],
        provider_subgroup_id: None,
        subscriber_count: 0,
        timestamps: Timestamps::new_now(),
        source: Origin::Api,
        revision: None,
    }
}

/// Scenario 6: a list create whose Phase C (provider call) fails
/// non-retryably leaves no primary record and no dangling uniqueness key.
#[tokio::test]
async fn provider_failure_rolls_back_list_create() {
    let kv = Arc::new(InMemoryKv::new());
    let bus = Arc::new(InMemoryBus::new());
    let secret = b"test-secret".to_vec();

    let provisioning_state = AppState::new(
        kv.clone(),
        bus.clone(),
        Arc::new(MockGroupsIoClient::new()),
        secret.clone(),
    );
    bus.queue_reply(subject::PROJECT_GET_SLUG, b"p2".to_vec()).await;
    bus.queue_reply(subject::PROJECT_GET_NAME, b"Project Two".to_vec()).await;
    let service = ServiceWriter::new(&provisioning_state)
        .create(formation_service("beta", "P2"), &WriteContext::default())
        .await
        .unwrap();

    let failing_provider = Arc::new(MockGroupsIoClient::new());
    {
        let mut guard = failing_provider.force_next_error.lock().await;
        *guard = Some(CoreError::validation("group_name", "rejected by provider"));
    }
    let failing_state = AppState::new(kv.clone(), bus.clone(), failing_provider, secret);

    let list = list_under(&service, "beta-dev");
    let err = ListWriter::new(&failing_state)
        .create(list.clone(), &WriteContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));

    assert!(ListWriter::new(&failing_state).get(&list.uid).await.unwrap().is_none());

    // The uniqueness key must have been rolled back: retrying with the same
    // group name succeeds instead of hitting a stale conflict.
    let retry = ListWriter::new(&failing_state)
        .create(list_under(&service, "beta-dev"), &WriteContext::default())
        .await
        .unwrap();
    assert_eq!(retry.revision, Some(1));
}

/// Scenario 4: committee-member-created fan-out respects each bound list's
/// `allowed_voting_statuses` filter independently.
#[tokio::test]
async fn committee_member_created_fanout_respects_per_list_filters() {
    let kv = Arc::new(InMemoryKv::new());
    let bus = Arc::new(InMemoryBus::new());
    let state = AppState::new(
        kv.clone(),
        bus.clone(),
        Arc::new(MockGroupsIoClient::new()),
        b"test-secret".to_vec(),
    );

    bus.queue_reply(subject::PROJECT_GET_SLUG, b"p3".to_vec()).await;
    bus.queue_reply(subject::PROJECT_GET_NAME, b"Project Three".to_vec()).await;
    let service = ServiceWriter::new(&state)
        .create(formation_service("gamma", "P3"), &WriteContext::default())
        .await
        .unwrap();

    let mut l1 = list_under(&service, "gamma-l1");
    let mut voting_only = HashSet::new();
    voting_only.insert(VotingStatus::VotingRep);
    l1.committee_bindings.push(CommitteeBinding {
        committee_uid: "C1".into(),
        allowed_voting_statuses: voting_only,
    });
    let l1 = ListWriter::new(&state).create(l1, &WriteContext::default()).await.unwrap();

    let mut l2 = list_under(&service, "gamma-l2");
    l2.committee_bindings.push(CommitteeBinding {
        committee_uid: "C1".into(),
        allowed_voting_statuses: HashSet::new(),
    });
    let l2 = ListWriter::new(&state).create(l2, &WriteContext::default()).await.unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = CommitteeConsumer::new(state.clone());
    let handle = tokio::spawn(consumer.run(shutdown_rx));
    // Give the consumer a moment to register its three queue subscriptions
    // before anything tries to deliver to them.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The roster-healing request/reply: empty roster, so only the event's
    // own embedded member is processed.
    bus.queue_reply(subject::COMMITTEE_LIST_MEMBERS, b"[]".to_vec()).await;

    let created = serde_json::json!({
        "committee_uid": "C1",
        "member": {
            "email": "a@x.com",
            "voting_status": "observer",
        }
    });
    let ack = bus
        .deliver(subject::COMMITTEE_MEMBER_CREATED, serde_json::to_vec(&created).unwrap())
        .await;
    assert_eq!(ack, Some(true));

    let member_writer = MemberWriter::new(&state);
    assert!(member_writer
        .find_by_list_and_email(&l2.uid, "a@x.com")
        .await
        .unwrap()
        .is_some());
    assert!(member_writer
        .find_by_list_and_email(&l1.uid, "a@x.com")
        .await
        .unwrap()
        .is_none());

    // An updated event promoting the same person to Voting Rep must add them
    // to L1 while leaving L2 (which already admits everyone) unchanged.
    bus.queue_reply(subject::COMMITTEE_LIST_MEMBERS, b"[]".to_vec()).await;
    let updated = serde_json::json!({
        "committee_uid": "C1",
        "old": { "email": "a@x.com", "voting_status": "observer" },
        "new": { "email": "a@x.com", "voting_status": "voting_rep" },
    });
    let ack = bus
        .deliver(subject::COMMITTEE_MEMBER_UPDATED, serde_json::to_vec(&updated).unwrap())
        .await;
    assert_eq!(ack, Some(true));

    assert!(member_writer
        .find_by_list_and_email(&l1.uid, "a@x.com")
        .await
        .unwrap()
        .is_some());
    let l2_members_before = member_writer.find_by_list_and_email(&l2.uid, "a@x.com").await.unwrap();
    assert!(l2_members_before.is_some());

    drop(_shutdown_tx);
    tokio::time::timeout(Duration::from_secs(1), handle).await.ok();
}

/// Scenario 5: a `created_subgroup` webhook for a known parent group adopts
/// a new list with `source=webhook` and no outbound provider call.
#[tokio::test]
async fn webhook_adopts_created_subgroup_without_calling_provider() {
    let kv = Arc::new(InMemoryKv::new());
    let bus = Arc::new(InMemoryBus::new());
    let provider = Arc::new(MockGroupsIoClient::new());
    let secret = b"webhook-secret".to_vec();
    let state = AppState::new(kv.clone(), bus.clone(), provider.clone(), secret.clone());

    bus.queue_reply(subject::PROJECT_GET_SLUG, b"p4".to_vec()).await;
    bus.queue_reply(subject::PROJECT_GET_NAME, b"Project Four".to_vec()).await;
    let mut service = formation_service("dev-parent", "P4");
    service.external_group_id = None;
    let created_service = ServiceWriter::new(&state)
        .create(service, &WriteContext::default())
        .await
        .unwrap();
    let parent_group_id = created_service.external_group_id.unwrap();

    provider.calls.lock().await.clear();

    let payload = serde_json::json!({
        "id": 1,
        "action": "created_subgroup",
        "group": parent_group_id,
        "extra": "dev",
        "extra_id": 67890,
    });
    let body = serde_json::to_vec(&payload).unwrap();
    let signature = mailing_list_core::webhook::sign(&secret, &body);

    WebhookProcessor::new(&state).process(&body, &signature).await.unwrap();

    let list_uid = ListWriter::new(&state)
        .find_by_subgroup_id(67890)
        .await
        .unwrap()
        .expect("adopted list indexed by subgroup id");
    let (list, _rev) = ListWriter::new(&state).get(&list_uid).await.unwrap().unwrap();
    assert_eq!(list.group_name, "dev");
    assert!(matches!(list.source, Origin::Webhook));
    assert_eq!(list.provider_subgroup_id, Some(67890));
    assert!(provider.calls.lock().await.is_empty(), "webhook-sourced adoption must not call the provider");
}

/// §8 universal invariant: a webhook with a tampered body is rejected even
/// though the signature header is unchanged.
#[tokio::test]
async fn webhook_rejects_tampered_body() {
    let kv = Arc::new(InMemoryKv::new());
    let bus = Arc::new(InMemoryBus::new());
    let secret = b"webhook-secret".to_vec();
    let state = AppState::new(kv, bus, Arc::new(MockGroupsIoClient::new()), secret.clone());

    let payload = serde_json::json!({"id": 1, "action": "deleted_subgroup", "extra_id": 1});
    let body = serde_json::to_vec(&payload).unwrap();
    let signature = mailing_list_core::webhook::sign(&secret, &body);

    let mut tampered = body.clone();
    tampered[0] = if tampered[0] == b'{' { b'[' } else { b'{' };

    let err = WebhookProcessor::new(&state)
        .process(&tampered, &signature)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}
