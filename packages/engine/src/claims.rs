//! Citizen claims
//!
//! A claim is a citizen-submitted correction of a field value. The claim
//! workflow (submission, review, approval) lives outside the engine; an
//! evaluation only receives the current claims for the law being evaluated
//! and lets them win over every other value source.
//!
//! Claims held by a remote claim store are reached through an
//! [`ExternalClaimResolver`], asked per declared input or source field the
//! request itself has no claim for.

use crate::error::Result;
use crate::types::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Review state of a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// Current claimed value of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub value: Value,
    /// Whether the field is required regardless of the property spec
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub status: ClaimStatus,
}

impl Claim {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            required: false,
            status: ClaimStatus::Pending,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_status(mut self, status: ClaimStatus) -> Self {
        self.status = status;
        self
    }

    /// Rejected claims never apply; pending ones only when unapproved data
    /// may be used.
    pub fn applies(&self, approved_only: bool) -> bool {
        match self.status {
            ClaimStatus::Approved => true,
            ClaimStatus::Pending => !approved_only,
            ClaimStatus::Rejected => false,
        }
    }
}

/// Remote claim store.
///
/// `parameters` are the evaluation's parameters (typically the BSN).
/// Returns `None` when there is no claim for the field; errors abort the
/// evaluation.
pub trait ExternalClaimResolver: Send + Sync {
    fn lookup(&self, law: &str, field: &str, parameters: &Record) -> Result<Option<Claim>>;
}

/// Claims keyed by field name
pub type Claims = BTreeMap<String, Claim>;

/// Keep claims usable for an evaluation: rejected claims never apply and,
/// when only approved data may be used, pending claims are dropped too.
pub fn applicable_claims(claims: &Claims, approved_only: bool) -> Claims {
    claims
        .iter()
        .filter(|(_, claim)| claim.applies(approved_only))
        .map(|(field, claim)| (field.clone(), claim.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        let mut claims = Claims::new();
        claims.insert("inkomen".into(), Claim::new(20_000i64).with_status(ClaimStatus::Approved));
        claims.insert("partner".into(), Claim::new(true));
        claims.insert("vermogen".into(), Claim::new(0i64).with_status(ClaimStatus::Rejected));
        claims
    }

    #[test]
    fn test_rejected_claims_never_apply() {
        let applicable = applicable_claims(&claims(), false);
        assert!(applicable.contains_key("inkomen"));
        assert!(applicable.contains_key("partner"));
        assert!(!applicable.contains_key("vermogen"));
    }

    #[test]
    fn test_approved_only_drops_pending() {
        let applicable = applicable_claims(&claims(), true);
        assert_eq!(applicable.keys().collect::<Vec<_>>(), vec!["inkomen"]);
    }

    #[test]
    fn test_claim_deserializes_with_defaults() {
        let claim: Claim = serde_json::from_str(r#"{"value": 42}"#).unwrap();
        assert_eq!(claim.value, Value::Int(42));
        assert!(!claim.required);
        assert_eq!(claim.status, ClaimStatus::Pending);
    }
}
