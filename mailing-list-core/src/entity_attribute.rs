//! Entity-attribute client (§4.5): request/reply lookups against sibling
//! services over the bus. Grounded on the request/reply shape of
//! `common::rpc` (a request goes out, a reply comes back as JSON) combined
//! with the bus-level timeout handling in `daemon/src/a2a/notify.rs`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::{subject, Bus};
use crate::error::CoreError;
use crate::model::VotingStatus;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A committee member as returned by the committee service's roster reply
/// (§4.3 "pulls the full roster ... request/reply on the entity-attribute
/// reader").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub email: String,
    pub voting_status: VotingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[allow(dead_code)]
    error: String,
}

/// Client for the well-known request/reply subjects (§4.5, §6).
pub struct EntityAttributeClient {
    bus: Arc<dyn Bus>,
}

impl EntityAttributeClient {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    async fn request_string(&self, subject: &str, uid: &str) -> Result<String, CoreError> {
        let reply = self
            .bus
            .request(subject, uid.as_bytes().to_vec(), REQUEST_TIMEOUT)
            .await
            .map_err(|_| CoreError::unavailable(format!("request to {subject} timed out")))?;

        if reply.is_empty() {
            return Err(CoreError::not_found(format!("{uid} via {subject}")));
        }
        if let Ok(err) = serde_json::from_slice::<ErrorBody>(&reply) {
            return Err(CoreError::not_found(format!("{}: {}", uid, err.error)));
        }
        Ok(String::from_utf8_lossy(&reply).trim_matches('"').to_string())
    }

    pub async fn project_slug(&self, project_uid: &str) -> Result<String, CoreError> {
        self.request_string(subject::PROJECT_GET_SLUG, project_uid).await
    }

    pub async fn project_name(&self, project_uid: &str) -> Result<String, CoreError> {
        self.request_string(subject::PROJECT_GET_NAME, project_uid).await
    }

    pub async fn project_parent_uid(&self, project_uid: &str) -> Result<String, CoreError> {
        self.request_string(subject::PROJECT_GET_PARENT_UID, project_uid).await
    }

    pub async fn committee_name(&self, committee_uid: &str) -> Result<String, CoreError> {
        self.request_string(subject::COMMITTEE_GET_NAME, committee_uid).await
    }

    /// Full committee roster. An empty array is a valid "no members" answer
    /// (§4.5), distinct from a not-found committee.
    pub async fn committee_members(&self, committee_uid: &str) -> Result<Vec<CommitteeMember>, CoreError> {
        let reply = self
            .bus
            .request(
                subject::COMMITTEE_LIST_MEMBERS,
                committee_uid.as_bytes().to_vec(),
                REQUEST_TIMEOUT,
            )
            .await
            .map_err(|_| CoreError::unavailable(format!("committee roster request timed out for {committee_uid}")))?;

        if let Ok(err) = serde_json::from_slice::<ErrorBody>(&reply) {
            return Err(CoreError::not_found(format!("{committee_uid}: {}", err.error)));
        }
        let value: Value = serde_json::from_slice(&reply)?;
        let members: Vec<CommitteeMember> = serde_json::from_value(value)?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_support::InMemoryBus;

    #[tokio::test]
    async fn empty_roster_is_valid() {
        let bus = Arc::new(InMemoryBus::new());
        bus.queue_reply(subject::COMMITTEE_LIST_MEMBERS, b"[]".to_vec()).await;
        let client = EntityAttributeClient::new(bus);
        let members = client.committee_members("C1").await.unwrap();
        assert!(members.is_empty());
    }

    #[tokio::test]
    async fn empty_payload_is_not_found() {
        let bus = Arc::new(InMemoryBus::new());
        bus.queue_reply(subject::PROJECT_GET_SLUG, Vec::new()).await;
        let client = EntityAttributeClient::new(bus);
        let err = client.project_slug("P1").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn error_body_is_not_found() {
        let bus = Arc::new(InMemoryBus::new());
        bus.queue_reply(subject::PROJECT_GET_NAME, br#"{"error":"no such project"}"#.to_vec())
            .await;
        let client = EntityAttributeClient::new(bus);
        let err = client.project_name("P1").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn raw_string_reply_is_unwrapped() {
        let bus = Arc::new(InMemoryBus::new());
        bus.queue_reply(subject::PROJECT_GET_SLUG, b"\"my-project\"".to_vec()).await;
        let client = EntityAttributeClient::new(bus);
        assert_eq!(client.project_slug("P1").await.unwrap(), "my-project");
    }
}
