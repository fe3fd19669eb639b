//! Structured audit events.
//!
//! Every authorization decision site emits an event here, never the
//! resource code path. Events go through `tracing` under the `audit`
//! target, so operators can route them independently of diagnostic logs
//! (e.g. `RUST_LOG=warn,audit=info`).
//!
//! Event vocabulary: `cap.issued`, `cap.revoked`, `auth.denied`,
//! `<op>.ok`, `<op>.denied`.

use tracing::info;

/// Target used for every audit event.
pub const TARGET: &str = "audit";

/// A capability was minted.
pub fn cap_issued(req_id: &str, subject: &str, capability_id: &str, service: &str) {
    info!(
        target: TARGET,
        event = "cap.issued",
        req_id,
        subject,
        capability_id,
        service,
    );
}

/// A capability was revoked (authoritative or replica).
pub fn cap_revoked(req_id: &str, capability_id: &str) {
    info!(
        target: TARGET,
        event = "cap.revoked",
        req_id,
        capability_id,
    );
}

/// A request failed authentication or authorization.
pub fn auth_denied(
    req_id: &str,
    subject: Option<&str>,
    capability_id: Option<&str>,
    action: &str,
    reason: &str,
) {
    info!(
        target: TARGET,
        event = "auth.denied",
        req_id,
        subject = subject.unwrap_or(""),
        capability_id = capability_id.unwrap_or(""),
        action,
        reason,
    );
}

/// An operation completed successfully after passing every check.
pub fn op_ok(req_id: &str, subject: &str, capability_id: &str, action: &str, resource: Option<&str>) {
    let event = format!("{action}.ok");
    info!(
        target: TARGET,
        event = event.as_str(),
        req_id,
        subject,
        capability_id,
        action,
        resource = resource.unwrap_or(""),
    );
}

/// An operation was denied after authentication (binding or revocation).
pub fn op_denied(
    req_id: &str,
    subject: Option<&str>,
    capability_id: Option<&str>,
    action: &str,
    resource: Option<&str>,
    reason: &str,
) {
    let event = format!("{action}.denied");
    info!(
        target: TARGET,
        event = event.as_str(),
        req_id,
        subject = subject.unwrap_or(""),
        capability_id = capability_id.unwrap_or(""),
        action,
        resource = resource.unwrap_or(""),
        reason,
    );
}
