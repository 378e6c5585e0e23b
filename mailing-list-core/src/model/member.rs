use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{index_key, normalize_key_part, Origin, Timestamps};
use crate::error::CoreError;

lazy_static! {
    // Pragmatic RFC-5322 "shape" check, not a full grammar implementation.
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    Committee,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Individual,
    Digest,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModStatus {
    None,
    Moderator,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Normal,
    Pending,
    Banned,
}

/// A person on a mailing list (§3 "Member").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub uid: String,
    pub list_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_member_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_group_id: Option<i64>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    pub member_type: MemberType,
    pub delivery_mode: DeliveryMode,
    pub mod_status: ModStatus,
    pub provider_status: ProviderStatus,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    pub source: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl Member {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.email.trim().is_empty() {
            return Err(CoreError::validation("email", "required"));
        }
        if !EMAIL_RE.is_match(self.email.trim()) {
            return Err(CoreError::validation("email", "not a valid email address"));
        }
        Ok(())
    }

    /// §3 "Derived keys": `lower(trim(list))|lower(trim(email))`.
    pub fn index_key(&self) -> String {
        Self::derive_index_key(&self.list_uid, &self.email)
    }

    /// Computes the uniqueness-constraint key for a (list, email) pair
    /// without an entity in hand, used by the webhook processor and
    /// committee consumer to look up an existing member by identity
    /// (§4.3 step 4 "by-email index", §4.4 "idempotent member creation").
    pub fn derive_index_key(list_uid: &str, email: &str) -> String {
        index_key(&format!(
            "{}|{}",
            normalize_key_part(list_uid),
            normalize_key_part(email),
        ))
    }

    pub fn tags(&self) -> Vec<String> {
        vec![
            format!("list_uid:{}", self.list_uid),
            format!("member_type:{:?}", self.member_type).to_lowercase(),
            format!("mod_status:{:?}", self.mod_status).to_lowercase(),
        ]
    }

    pub fn check_immutable_fields(&self, other: &Member) -> Result<(), CoreError> {
        if normalize_key_part(&self.list_uid) != normalize_key_part(&other.list_uid)
            || normalize_key_part(&self.email) != normalize_key_part(&other.email)
        {
            return Err(CoreError::validation("email", "immutable once created"));
        }
        Ok(())
    }

    /// Applies the mutable-field subset the committee consumer updates on a
    /// "still a member" transition (§4.3 step 4).
    pub fn apply_committee_profile_update(
        &mut self,
        first_name: Option<String>,
        last_name: Option<String>,
        organization: Option<String>,
        job_title: Option<String>,
    ) {
        self.first_name = first_name;
        self.last_name = last_name;
        self.organization = organization;
        self.job_title = job_title;
        self.timestamps.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_member() -> Member {
        Member {
            uid: "M1".into(),
            list_uid: "L1".into(),
            provider_member_id: None,
            provider_group_id: None,
            email: "a@x.com".into(),
            first_name: None,
            last_name: None,
            organization: None,
            job_title: None,
            member_type: MemberType::Direct,
            delivery_mode: DeliveryMode::Individual,
            mod_status: ModStatus::None,
            provider_status: ProviderStatus::Normal,
            timestamps: Timestamps::new_now(),
            source: Origin::Api,
            revision: None,
        }
    }

    #[test]
    fn rejects_malformed_email() {
        let mut member = base_member();
        member.email = "not-an-email".into();
        assert!(member.validate().is_err());
    }

    #[test]
    fn index_key_insensitive_to_case_and_whitespace() {
        let mut a = base_member();
        a.email = "  A@X.com ".into();
        let mut b = base_member();
        b.email = "a@x.com".into();
        assert_eq!(a.index_key(), b.index_key());
    }

    #[test]
    fn immutable_check_flags_email_change() {
        let a = base_member();
        let mut b = a.clone();
        b.email = "other@x.com".into();
        assert!(a.check_immutable_fields(&b).is_err());
    }
}
