use serde::{Deserialize, Serialize};

use super::{index_key, normalize_key_part, AuditMeta, Origin, Timestamps};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Primary,
    Formation,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Active,
    Disabled,
}

/// Top-level container for a project's mailing-list infrastructure at the
/// provider (§3 "Service").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub uid: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub provider_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_group_id: Option<i64>,
    pub status: ServiceStatus,
    pub owners: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_prefix: Option<String>,
    pub project_uid: String,
    pub project_slug: String,
    pub project_name: String,
    pub group_name: String,
    pub public: bool,
    pub writers: Vec<String>,
    pub auditors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reviewed: Option<AuditMeta>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    pub source: Origin,
    /// Server-assigned revision, populated on read; absent on a fresh Create
    /// request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl Service {
    /// Structural validation (§4.2 Phase A). Named-field errors so the
    /// transport layer can surface "field: message" to the caller.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.service_type {
            ServiceType::Formation => {
                let prefix = self
                    .url_prefix
                    .as_deref()
                    .ok_or_else(|| CoreError::validation("url_prefix", "required for formation services"))?;
                if prefix.is_empty() {
                    return Err(CoreError::validation("url_prefix", "must not be empty"));
                }
                if !self.group_name.starts_with(&format!("{prefix}-")) {
                    return Err(CoreError::validation(
                        "group_name",
                        format!("must start with parent service prefix '{prefix}-'"),
                    ));
                }
            }
            ServiceType::Shared => {
                let prefix = self
                    .url_prefix
                    .as_deref()
                    .ok_or_else(|| CoreError::validation("url_prefix", "required for shared services"))?;
                if prefix.is_empty() {
                    return Err(CoreError::validation("url_prefix", "must not be empty"));
                }
                if !self.group_name.starts_with(&format!("{prefix}-")) {
                    return Err(CoreError::validation(
                        "group_name",
                        format!("must start with parent service prefix '{prefix}-'"),
                    ));
                }
            }
            ServiceType::Primary => {}
        }
        if self.owners.is_empty() {
            return Err(CoreError::validation("owners", "at least one owner required"));
        }
        Ok(())
    }

    /// §3 "Derived keys" — the uniqueness-constraint key for this service.
    pub fn index_key(&self) -> String {
        let canonical = match self.service_type {
            ServiceType::Primary => format!(
                "{}|{}",
                normalize_key_part(&self.project_uid),
                "primary"
            ),
            ServiceType::Formation => format!(
                "{}|{}|{}",
                normalize_key_part(&self.project_uid),
                "formation",
                normalize_key_part(self.url_prefix.as_deref().unwrap_or_default()),
            ),
            ServiceType::Shared => format!(
                "{}|{}|{}",
                normalize_key_part(&self.project_uid),
                "shared",
                normalize_key_part(&self.group_name),
            ),
        };
        index_key(&canonical)
    }

    /// Tags consumed by the downstream indexer (§3 "tags").
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![
            format!("project_uid:{}", self.project_uid),
            format!("type:{:?}", self.service_type).to_lowercase(),
            format!("public:{}", self.public),
        ];
        if let Some(group_id) = self.external_group_id {
            tags.push(format!("group_id:{group_id}"));
        }
        tags
    }

    /// Fields contributing to `index_key()` are immutable once persisted
    /// (§4.2 "Update specifics"). Returns `Err` naming the first offending
    /// field if `other` would change one of them.
    pub fn check_immutable_fields(&self, other: &Service) -> Result<(), CoreError> {
        if self.service_type != other.service_type {
            return Err(CoreError::validation("type", "immutable once created"));
        }
        match self.service_type {
            ServiceType::Formation if self.url_prefix != other.url_prefix => {
                Err(CoreError::validation("url_prefix", "immutable once created"))
            }
            ServiceType::Shared if self.group_name != other.group_name => {
                Err(CoreError::validation("group_name", "immutable once created"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_service() -> Service {
        Service {
            uid: "S1".into(),
            service_type: ServiceType::Formation,
            provider_domain: "groups.io".into(),
            external_group_id: None,
            status: ServiceStatus::Pending,
            owners: vec!["owner@x.com".into()],
            url_prefix: Some("alpha".into()),
            project_uid: "P1".into(),
            project_slug: "p1".into(),
            project_name: "Project One".into(),
            group_name: "alpha".into(),
            public: true,
            writers: vec![],
            auditors: vec![],
            last_reviewed: None,
            timestamps: Timestamps::new_now(),
            source: Origin::Api,
            revision: None,
        }
    }

    #[test]
    fn formation_group_name_must_start_with_prefix() {
        let mut service = base_service();
        service.group_name = "not-alpha".into();
        let err = service.validate().unwrap_err();
        assert!(matches!(err, CoreError::Validation { field, .. } if field == "group_name"));
    }

    #[test]
    fn shared_requires_url_prefix() {
        let mut service = base_service();
        service.service_type = ServiceType::Shared;
        service.url_prefix = None;
        service.group_name = "shared-name".into();
        let err = service.validate().unwrap_err();
        assert!(matches!(err, CoreError::Validation { field, .. } if field == "url_prefix"));
    }

    #[test]
    fn shared_group_name_must_start_with_prefix() {
        let mut service = base_service();
        service.service_type = ServiceType::Shared;
        service.url_prefix = Some("alpha".into());
        service.group_name = "not-alpha".into();
        let err = service.validate().unwrap_err();
        assert!(matches!(err, CoreError::Validation { field, .. } if field == "group_name"));
    }

    #[test]
    fn primary_index_key_ignores_prefix() {
        let mut a = base_service();
        a.service_type = ServiceType::Primary;
        a.url_prefix = None;
        let mut b = a.clone();
        b.url_prefix = Some("irrelevant".into());
        assert_eq!(a.index_key(), b.index_key());
    }

    #[test]
    fn immutable_group_name_rejected_for_shared() {
        let mut a = base_service();
        a.service_type = ServiceType::Shared;
        a.group_name = "shared-name".into();
        let mut b = a.clone();
        b.group_name = "other-name".into();
        assert!(a.check_immutable_fields(&b).is_err());
    }
}
