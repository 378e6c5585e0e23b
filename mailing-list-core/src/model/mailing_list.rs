use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{index_key, normalize_key_part, Origin, Timestamps};
use crate::error::CoreError;

lazy_static! {
    static ref GROUP_NAME_RE: Regex = Regex::new(r"^[a-z][a-z0-9-]*[a-z0-9]$").unwrap();
}

const MIN_DESCRIPTION_LEN: usize = 11;
const MIN_GROUP_NAME_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailingListType {
    Announcement,
    DiscussionModerated,
    DiscussionOpen,
}

/// Closed enum of committee voting statuses (§3, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStatus {
    VotingRep,
    AlternateVotingRep,
    Observer,
    Emeritus,
    None,
}

/// Binds a mailing list to a committee, optionally filtering which
/// voting-status members are admitted (§3, §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeBinding {
    pub committee_uid: String,
    /// Empty set means "admit all" (§4.3 step 4).
    pub allowed_voting_statuses: HashSet<VotingStatus>,
}

impl CommitteeBinding {
    pub fn admits(&self, status: VotingStatus) -> bool {
        self.allowed_voting_statuses.is_empty() || self.allowed_voting_statuses.contains(&status)
    }
}

/// A list within a service (§3 "MailingList").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailingList {
    pub uid: String,
    pub group_name: String,
    pub public: bool,
    #[serde(rename = "type")]
    pub list_type: MailingListType,
    pub description: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_tag: Option<String>,
    pub service_uid: String,
    pub project_uid: String,
    #[serde(default)]
    pub committee_bindings: Vec<CommitteeBinding>,
    pub writers: Vec<String>,
    pub auditors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_subgroup_id: Option<i64>,
    #[serde(default)]
    pub subscriber_count: u64,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    pub source: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl MailingList {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.group_name.len() < MIN_GROUP_NAME_LEN || !GROUP_NAME_RE.is_match(&self.group_name)
        {
            return Err(CoreError::validation(
                "group_name",
                "must match ^[a-z][a-z0-9-]*[a-z0-9]$ and be at least 2 characters",
            ));
        }
        if self.description.len() < MIN_DESCRIPTION_LEN {
            return Err(CoreError::validation(
                "description",
                format!("must be at least {MIN_DESCRIPTION_LEN} characters"),
            ));
        }
        for binding in &self.committee_bindings {
            if binding.committee_uid.trim().is_empty() {
                return Err(CoreError::validation(
                    "committee_bindings",
                    "committee_uid must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// §3 "Derived keys": `project|group-name`.
    pub fn index_key(&self) -> String {
        index_key(&format!(
            "{}|{}",
            normalize_key_part(&self.project_uid),
            normalize_key_part(&self.group_name),
        ))
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![
            format!("project_uid:{}", self.project_uid),
            format!("service_uid:{}", self.service_uid),
            format!("type:{:?}", self.list_type).to_lowercase(),
            format!("public:{}", self.public),
        ];
        for binding in &self.committee_bindings {
            tags.push(format!("committee_uid:{}", binding.committee_uid));
        }
        tags
    }

    /// §3: "A list is committee-based iff it has >= 1 committee binding."
    pub fn is_committee_based(&self) -> bool {
        !self.committee_bindings.is_empty()
    }

    pub fn check_immutable_fields(&self, other: &MailingList) -> Result<(), CoreError> {
        if self.group_name != other.group_name {
            return Err(CoreError::validation("group_name", "immutable once created"));
        }
        if self.service_uid != other.service_uid {
            return Err(CoreError::validation("service_uid", "immutable once created"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_list() -> MailingList {
        MailingList {
            uid: "L1".into(),
            group_name: "alpha-dev".into(),
            public: true,
            list_type: MailingListType::DiscussionOpen,
            description: "Dev discussions here.".into(),
            title: "Dev".into(),
            subject_tag: None,
            service_uid: "S1".into(),
            project_uid: "P1".into(),
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

    #[test]
    fn rejects_short_group_name() {
        let mut list = base_list();
        list.group_name = "a".into();
        assert!(list.validate().is_err());
    }

    #[test]
    fn rejects_uppercase_group_name() {
        let mut list = base_list();
        list.group_name = "Alpha-Dev".into();
        assert!(list.validate().is_err());
    }

    #[test]
    fn rejects_short_description() {
        let mut list = base_list();
        list.description = "short".into();
        assert!(list.validate().is_err());
    }

    #[test]
    fn empty_filter_admits_all() {
        let binding = CommitteeBinding {
            committee_uid: "C1".into(),
            allowed_voting_statuses: HashSet::new(),
        };
        assert!(binding.admits(VotingStatus::Observer));
    }

    #[test]
    fn nonempty_filter_restricts() {
        let mut set = HashSet::new();
        set.insert(VotingStatus::VotingRep);
        let binding = CommitteeBinding {
            committee_uid: "C1".into(),
            allowed_voting_statuses: set,
        };
        assert!(binding.admits(VotingStatus::VotingRep));
        assert!(!binding.admits(VotingStatus::Observer));
    }

    #[test]
    fn committee_based_iff_has_bindings() {
        let mut list = base_list();
        assert!(!list.is_committee_based());
        list.committee_bindings.push(CommitteeBinding {
            committee_uid: "C1".into(),
            allowed_voting_statuses: HashSet::new(),
        });
        assert!(list.is_committee_based());
    }
}
