//! Event publisher and bus transport (§4.6, Ambient §4.8). Two envelope
//! families — indexer and access — plus a broker-agnostic `Bus` trait the
//! orchestration writers publish through and the entity-attribute client
//! performs request/reply over.
//!
//! Grounded on the JSON-RPC transport abstraction in `common::rpc`
//! (subjects/methods are plain strings, payloads are opaque bytes; the
//! transport is swappable behind a trait) and the plain-envelope-struct
//! style of `common::api::callback::CallbackPayload`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerAction {
    Created,
    Updated,
    Deleted,
}

/// Indexer envelope (§4.6). `data` is the full entity for created/updated,
/// the bare UID string for deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerEnvelope {
    pub action: IndexerAction,
    pub headers: RequestHeaders,
    pub data: Value,
    pub tags: Vec<String>,
}

/// Headers extracted from the originating request context, carrying authZ
/// passthrough (§4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    #[serde(rename = "x-on-behalf-of", skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<String>,
}

/// Access envelope (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEnvelope {
    pub uid: String,
    pub object_type: String,
    pub public: bool,
    #[serde(default)]
    pub relations: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub references: HashMap<String, String>,
}

/// Subjects published to (§6 "Bus subjects (produced)").
pub mod subject {
    pub const INDEX_SERVICE: &str = "lfx.index.groupsio_service";
    pub const INDEX_MAILING_LIST: &str = "lfx.index.groupsio_mailing_list";
    pub const INDEX_MEMBER: &str = "lfx.index.groupsio_member";
    pub const UPDATE_ACCESS_SERVICE: &str = "lfx.update_access.groupsio_service";
    pub const UPDATE_ACCESS_MAILING_LIST: &str = "lfx.update_access.groupsio_mailing_list";
    pub const UPDATE_ACCESS_MEMBER: &str = "lfx.update_access.groupsio_member";
    pub const DELETE_ALL_ACCESS_SERVICE: &str = "lfx.delete_all_access.groupsio_service";
    pub const DELETE_ALL_ACCESS_MAILING_LIST: &str = "lfx.delete_all_access.groupsio_mailing_list";
    pub const DELETE_ALL_ACCESS_MEMBER: &str = "lfx.delete_all_access.groupsio_member";
    pub const MAILING_LIST_CREATED: &str = "lfx.mailing-list-api.mailing_list_created";
    pub const MAILING_LIST_UPDATED: &str = "lfx.mailing-list-api.mailing_list_updated";
    pub const PUT_MEMBER: &str = "lfx.put_member.groupsio_mailing_list";
    pub const REMOVE_MEMBER: &str = "lfx.remove_member.groupsio_mailing_list";

    pub const COMMITTEE_MEMBER_CREATED: &str = "lfx.committee-api.committee_member.created";
    pub const COMMITTEE_MEMBER_DELETED: &str = "lfx.committee-api.committee_member.deleted";
    pub const COMMITTEE_MEMBER_UPDATED: &str = "lfx.committee-api.committee_member.updated";
    pub const COMMITTEE_LIST_MEMBERS: &str = "lfx.committee-api.list_members";
    pub const COMMITTEE_GET_NAME: &str = "lfx.committee-api.get_name";
    pub const PROJECT_GET_SLUG: &str = "lfx.projects-api.get_slug";
    pub const PROJECT_GET_NAME: &str = "lfx.projects-api.get_name";
    pub const PROJECT_GET_PARENT_UID: &str = "lfx.projects-api.get_parent_uid";

    pub const QUEUE_GROUP: &str = "lfx-v2-mailing-list-api";
}

/// A delivered queue-group message (§4.3, §5 "queue group so horizontal
/// replicas compete safely"). `ack`/`nak` consume the message since a given
/// delivery may only be acknowledged once.
pub struct Message {
    pub payload: Vec<u8>,
    ack_tx: Option<tokio::sync::oneshot::Sender<bool>>,
}

impl Message {
    pub fn new(payload: Vec<u8>, ack_tx: tokio::sync::oneshot::Sender<bool>) -> Self {
        Self {
            payload,
            ack_tx: Some(ack_tx),
        }
    }

    pub fn ack(mut self) {
        if let Some(tx) = self.ack_tx.take() {
            let _ = tx.send(true);
        }
    }

    pub fn nak(mut self) {
        if let Some(tx) = self.ack_tx.take() {
            let _ = tx.send(false);
        }
    }
}

/// Broker-agnostic bus transport (Ambient §4.8). Production wiring adapts a
/// real broker client to this trait; tests use an in-memory fake.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), CoreError>;

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, CoreError>;

    async fn ping(&self) -> Result<(), CoreError>;

    /// Competing-consumer subscription: each message is delivered to exactly
    /// one subscriber sharing `queue_group` (§4.3, §5).
    async fn subscribe_queue(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<tokio::sync::mpsc::UnboundedReceiver<Message>, CoreError>;
}

/// Publishes indexer and access envelopes. Publication is fire-and-forget
/// JSON (§4.6); callers treat a `ServiceUnavailable` here as best-effort
/// per §4.2 Phase E / §7 ("Publication errors after successful persistence
/// are demoted to critical log lines").
pub struct EventPublisher {
    bus: Arc<dyn Bus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub async fn publish_indexer(
        &self,
        subject: &str,
        envelope: &IndexerEnvelope,
    ) -> Result<(), CoreError> {
        let payload = serde_json::to_vec(envelope)?;
        self.bus.publish(subject, payload).await
    }

    pub async fn publish_access(
        &self,
        subject: &str,
        envelope: &AccessEnvelope,
    ) -> Result<(), CoreError> {
        let payload = serde_json::to_vec(envelope)?;
        self.bus.publish(subject, payload).await
    }

    pub async fn publish_domain_event(&self, subject: &str, data: &Value) -> Result<(), CoreError> {
        let payload = serde_json::to_vec(data)?;
        self.bus.publish(subject, payload).await
    }
}

#[cfg(any(test, feature = "mock"))]
pub mod test_support {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// In-memory `Bus` fake recording published messages, grounded on the
    /// "mock repository maps guarded by a mutex, test-only" pattern (§9
    /// "Global state").
    #[derive(Default)]
    pub struct InMemoryBus {
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub replies: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
        subscribers: Mutex<HashMap<String, tokio::sync::mpsc::UnboundedSender<Message>>>,
    }

    impl InMemoryBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn queue_reply(&self, subject: &str, payload: Vec<u8>) {
            self.replies
                .lock()
                .await
                .entry(subject.to_string())
                .or_default()
                .push_back(payload);
        }

        /// Delivers `payload` to whichever subscriber registered for
        /// `subject` and awaits the ack/nak decision, for asserting consumer
        /// behavior in tests.
        pub async fn deliver(&self, subject: &str, payload: Vec<u8>) -> Option<bool> {
            let sender = self.subscribers.lock().await.get(subject).cloned()?;
            let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
            sender.send(Message::new(payload, ack_tx)).ok()?;
            ack_rx.await.ok()
        }
    }

    #[async_trait]
    impl Bus for InMemoryBus {
        async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), CoreError> {
            self.published.lock().await.push((subject.to_string(), payload));
            Ok(())
        }

        async fn request(
            &self,
            subject: &str,
            _payload: Vec<u8>,
            _timeout: Duration,
        ) -> Result<Vec<u8>, CoreError> {
            self.replies
                .lock()
                .await
                .get_mut(subject)
                .and_then(|q| q.pop_front())
                .ok_or_else(|| CoreError::not_found(format!("no queued reply for {subject}")))
        }

        async fn ping(&self) -> Result<(), CoreError> {
            Ok(())
        }

        async fn subscribe_queue(
            &self,
            subject: &str,
            _queue_group: &str,
        ) -> Result<tokio::sync::mpsc::UnboundedReceiver<Message>, CoreError> {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            self.subscribers.lock().await.insert(subject.to_string(), tx);
            Ok(rx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::InMemoryBus;
    use super::*;

    #[tokio::test]
    async fn publishes_indexer_envelope() {
        let bus = Arc::new(InMemoryBus::new());
        let publisher = EventPublisher::new(bus.clone());
        let envelope = IndexerEnvelope {
            action: IndexerAction::Created,
            headers: RequestHeaders::default(),
            data: serde_json::json!({"uid": "S1"}),
            tags: vec!["project_uid:P1".into()],
        };
        publisher
            .publish_indexer(subject::INDEX_SERVICE, &envelope)
            .await
            .unwrap();
        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, subject::INDEX_SERVICE);
    }
}
