//! Capability claims and constraints.
//!
//! A [`Capability`] is the structured content of a signed token. It names the
//! target service, the permitted operations, and any constraints on their
//! use. Claims are immutable once signed; any mutation invalidates the
//! signature.
//!
//! # Permission fields
//!
//! Two permission lists coexist during the `actions` → `rights` migration:
//!
//! - `actions`: legacy bare action names (`"open"`)
//! - `rights`: fully-qualified permission identifiers (`"fs.open"`)
//!
//! Minting populates both lists (see [`normalize_permissions`]) so a token
//! can traverse old and new verifiers; verification accepts either.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Fixed principal tag carried in the `sub` claim.
pub const SUBJECT: &str = "capability";

/// Signed capability token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Opaque random identifier, 128 bits, hex-encoded. Unique per token.
    #[serde(rename = "jti")]
    pub id: String,

    /// Principal tag (fixed literal for now).
    #[serde(rename = "sub")]
    pub subject: String,

    /// Issuance timestamp.
    #[serde(rename = "iat")]
    pub issued_at: DateTime<Utc>,

    /// Expiry timestamp. Always after `issued_at`.
    #[serde(rename = "exp")]
    pub expires_at: DateTime<Utc>,

    /// Exact name of the target resource service (e.g. `"fs"`).
    pub service: String,

    /// Legacy permission list (bare action names).
    pub actions: Vec<String>,

    /// Preferred permission list (fully-qualified `service.action` names).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rights: Vec<String>,

    /// Additional restrictions beyond the permission lists.
    #[serde(default)]
    pub constraints: Constraints,
}

/// Constraints limiting what a capability may access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    /// Filesystem subtree the capability is confined to. Empty means
    /// unconstrained.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path_prefix: String,

    /// Request-rate bound of the form `<N>rps`. Empty means unlimited.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rate_limit: String,
}

impl Capability {
    /// Creates a capability with a fresh random id, stamped `issued_at = now`
    /// and `expires_at = now + ttl`.
    #[must_use]
    pub fn new(
        service: impl Into<String>,
        actions: Vec<String>,
        rights: Vec<String>,
        constraints: Constraints,
        ttl: Duration,
    ) -> Self {
        let mut id = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut id);
        let now = Utc::now();
        Self {
            id: hex::encode(id),
            subject: SUBJECT.to_string(),
            issued_at: now,
            expires_at: now + ttl,
            service: service.into(),
            actions,
            rights,
            constraints,
        }
    }

    /// Returns true if the capability's expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns true if the legacy action list contains `action`.
    #[must_use]
    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    /// Returns true if the rights list contains the fully-qualified `right`.
    #[must_use]
    pub fn has_right(&self, right: &str) -> bool {
        self.rights.iter().any(|r| r == right)
    }
}

/// Expands a mixed set of bare actions and fully-qualified rights into the
/// dual `(actions, rights)` lists minted into a token.
///
/// Every bare action gains a `service.action` entry in `rights`; every right
/// scoped to `service` gains a bare entry in `actions`. Order is preserved
/// and duplicates are dropped.
#[must_use]
pub fn normalize_permissions(
    service: &str,
    actions: &[String],
    rights: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut out_actions: Vec<String> = Vec::new();
    let mut out_rights: Vec<String> = Vec::new();

    let mut push = |list: &mut Vec<String>, value: String| {
        if !list.contains(&value) {
            list.push(value);
        }
    };

    for action in actions {
        push(&mut out_actions, action.clone());
        push(&mut out_rights, format!("{service}.{action}"));
    }
    let qualifier = format!("{service}.");
    for right in rights {
        push(&mut out_rights, right.clone());
        if let Some(bare) = right.strip_prefix(&qualifier) {
            push(&mut out_actions, bare.to_string());
        }
    }

    (out_actions, out_rights)
}
