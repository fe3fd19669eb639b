//! Centralized authorization decisions for all Strata services.
//!
//! Services call [`PolicyEngine::authorize`] instead of performing ad-hoc
//! permission checks, so the semantics are identical everywhere. The
//! decision is deny-by-default: `Ok` requires passing every step.
//!
//! Decision order:
//!
//! 1. absent claims → `Unauthenticated`
//! 2. malformed method string → `PermissionDenied`
//! 3. service mismatch → `PermissionDenied`
//! 4. neither right nor legacy action matches → `PermissionDenied`
//! 5. path-prefix constraint ([`constraints`])
//! 6. rate-limit constraint ([`rate`])
//!
//! Expiration is the verifier's concern; `authorize` assumes claim
//! freshness. The engine performs no I/O.

pub mod constraints;
pub mod rate;

use std::sync::Arc;

use thiserror::Error;

use crate::capability::Capability;
use crate::ipc::ErrorCode;
use self::rate::{Clock, RateLimiter, SystemClock};

/// Structured denial produced at the decision site and surfaced verbatim to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PolicyError {
    /// Catalog code for the denial class.
    pub code: ErrorCode,
    /// Human-readable cause.
    pub message: String,
}

impl PolicyError {
    /// Authentication failure (code 2).
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Unauthenticated,
            message: message.into(),
        }
    }

    /// Authorization failure (code 3).
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::PermissionDenied,
            message: message.into(),
        }
    }

    /// Rate-limit exhaustion (code 7).
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ResourceExhausted,
            message: message.into(),
        }
    }
}

/// Method-specific context accompanying an authorization request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthContext<'a> {
    /// Target filesystem path, for methods that take one.
    pub path: Option<&'a str>,
}

impl<'a> AuthContext<'a> {
    /// Context with no path (e.g. handle-based reads).
    pub const NONE: AuthContext<'static> = AuthContext { path: None };

    /// Context carrying a target path.
    #[must_use]
    pub const fn with_path(path: &'a str) -> Self {
        Self { path: Some(path) }
    }
}

/// The authorization decision function plus the constraint state it owns.
///
/// The rate-bucket map is shared across concurrent request handlers under
/// the limiter's mutex; the engine itself is immutable after construction.
pub struct PolicyEngine {
    limiter: RateLimiter,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Creates an engine on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an engine on an injected clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: RateLimiter::new(clock),
        }
    }

    /// Checks whether `claims` permit `method` under `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a [`PolicyError`] describing the first check that failed.
    pub fn authorize(
        &self,
        claims: Option<&Capability>,
        method: &str,
        ctx: &AuthContext<'_>,
    ) -> Result<(), PolicyError> {
        let Some(claims) = claims else {
            return Err(PolicyError::unauthenticated("token required"));
        };

        let Some((service, action)) = method.split_once('.') else {
            return Err(PolicyError::permission_denied(format!(
                "invalid method format: {method:?}"
            )));
        };

        // Token must be scoped to the correct service.
        if claims.service != service {
            return Err(PolicyError::permission_denied(format!(
                "token not valid for service {service:?}"
            )));
        }

        // Fully-qualified rights are preferred; legacy actions are accepted
        // as a fallback.
        if !claims.has_right(method) && !claims.has_action(action) {
            return Err(PolicyError::permission_denied(format!(
                "method {method:?} not permitted"
            )));
        }

        constraints::enforce_path_prefix(&claims.constraints.path_prefix, ctx.path)?;
        self.limiter
            .check(&claims.id, &claims.constraints.rate_limit)?;

        Ok(())
    }

    /// Drops the rate bucket of a revoked capability. Invoked from the
    /// revocation path so revoked ids do not pin limiter memory.
    pub fn evict_capability(&self, capability_id: &str) {
        self.limiter.evict(capability_id);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::capability::Constraints;

    fn claims(service: &str, actions: &[&str], rights: &[&str]) -> Capability {
        Capability::new(
            service,
            actions.iter().map(ToString::to_string).collect(),
            rights.iter().map(ToString::to_string).collect(),
            Constraints::default(),
            Duration::seconds(60),
        )
    }

    #[test]
    fn nil_claims_are_unauthenticated() {
        let engine = PolicyEngine::new();
        let err = engine
            .authorize(None, "fs.open", &AuthContext::NONE)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthenticated);
    }

    #[test]
    fn malformed_method_is_denied() {
        let engine = PolicyEngine::new();
        let cap = claims("fs", &["open"], &[]);
        for method in ["open", "", "fsopen"] {
            let err = engine
                .authorize(Some(&cap), method, &AuthContext::NONE)
                .unwrap_err();
            assert_eq!(err.code, ErrorCode::PermissionDenied);
            assert!(err.message.contains("invalid method"));
        }
    }

    #[test]
    fn wrong_service_is_denied() {
        let engine = PolicyEngine::new();
        let cap = claims("fs", &["open"], &["fs.open"]);
        let err = engine
            .authorize(Some(&cap), "net.open", &AuthContext::NONE)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        assert!(err.message.contains("not valid for service"));
    }

    #[test]
    fn right_match_authorizes() {
        let engine = PolicyEngine::new();
        let cap = claims("fs", &[], &["fs.open"]);
        engine
            .authorize(Some(&cap), "fs.open", &AuthContext::NONE)
            .unwrap();
    }

    #[test]
    fn legacy_action_match_authorizes() {
        let engine = PolicyEngine::new();
        let cap = claims("fs", &["open"], &[]);
        engine
            .authorize(Some(&cap), "fs.open", &AuthContext::NONE)
            .unwrap();
    }

    #[test]
    fn unlisted_method_is_denied() {
        let engine = PolicyEngine::new();
        let cap = claims("fs", &["open"], &["fs.open"]);
        let err = engine
            .authorize(Some(&cap), "fs.list", &AuthContext::NONE)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        assert!(err.message.contains("not permitted"));
    }

    #[test]
    fn path_constraint_flows_through_authorize() {
        let engine = PolicyEngine::new();
        let mut cap = claims("fs", &["list"], &["fs.list"]);
        cap.constraints.path_prefix = "/tmp".into();

        engine
            .authorize(Some(&cap), "fs.list", &AuthContext::with_path("/tmp/sub"))
            .unwrap();
        let err = engine
            .authorize(Some(&cap), "fs.list", &AuthContext::with_path("/etc"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
    }

    #[test]
    fn rate_constraint_flows_through_authorize() {
        let engine = PolicyEngine::new();
        let mut cap = claims("fs", &["list"], &["fs.list"]);
        cap.constraints.rate_limit = "2rps".into();

        engine
            .authorize(Some(&cap), "fs.list", &AuthContext::NONE)
            .unwrap();
        engine
            .authorize(Some(&cap), "fs.list", &AuthContext::NONE)
            .unwrap();
        let err = engine
            .authorize(Some(&cap), "fs.list", &AuthContext::NONE)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceExhausted);
    }
}
