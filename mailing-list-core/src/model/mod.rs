//! Domain model: entity records, index-key derivation, tag derivation and
//! structural validation (§3, §4.7). This layer knows nothing about storage,
//! the bus, or the provider — it is pure data plus pure functions over that
//! data, grounded on the plain-struct-plus-enum modelling style used
//! throughout `common::a2a` (e.g. `RegisteredAgent`/`AgentStatus`).

mod mailing_list;
mod member;
mod service;

pub use mailing_list::*;
pub use member::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Provenance of a mutation (glossary: Origin / source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// We initiated the change; the orchestration writer must call the provider.
    Api,
    /// The provider initiated the change via webhook; do not call back.
    Webhook,
    /// Test/mock origin; provider calls are skipped.
    Mock,
}

impl Origin {
    /// Phase C of the five-phase protocol is only executed for `Api` origin.
    pub fn calls_provider(&self) -> bool {
        matches!(self, Origin::Api)
    }
}

/// Audit metadata attached to a "last reviewed" style field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMeta {
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Server-filled timestamps common to every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timestamps {
    pub fn new_now() -> Self {
        let now = crate::time::now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = crate::time::now();
    }
}

/// Hex-SHA-256 of a canonical delimited string; the uniqueness-constraint key
/// for an entity (§3 "Derived keys").
pub fn index_key(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Trims and lowercases a field contributing to an index key, matching §8's
/// "trimming/lowercasing-insensitive for whitespace and case" round-trip law.
pub fn normalize_key_part(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_key_is_deterministic() {
        let a = index_key("P1|primary");
        let b = index_key("P1|primary");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn index_key_is_case_and_whitespace_insensitive_via_normalize() {
        let a = index_key(&format!(
            "{}|{}",
            normalize_key_part("  List1 "),
            normalize_key_part(" A@X.com ")
        ));
        let b = index_key(&format!(
            "{}|{}",
            normalize_key_part("list1"),
            normalize_key_part("a@x.com")
        ));
        assert_eq!(a, b);
    }
}
