//! Request dispatch for the issuer service.
//!
//! Issuance validates the request shape up front (including the rate-limit
//! string, which is rejected here rather than failing open at enforcement),
//! mints claims with both permission lists populated, and signs them. The
//! revoke acknowledgement is sent as soon as the authoritative store has
//! durably recorded the id; fan-out to resource services happens in the
//! background.

use ed25519_dalek::SigningKey;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use strata_core::audit;
use strata_core::capability::{normalize_permissions, Capability, Constraints};
use strata_core::crypto::{sign, verify};
use strata_core::ipc::{decode_params, Dispatch, ErrorCode, PeerCredentials, Request, Response};
use strata_core::policy::rate::parse_rate;
use strata_core::revocation::RevocationStore;

use crate::notifier::RevocationNotifier;

/// Service name; the prefix of every method this service handles.
pub const SERVICE_NAME: &str = "issuer";

/// TTL applied when the request omits one or supplies a non-positive value.
const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Deserialize)]
struct IssueParams {
    #[serde(default)]
    service: String,
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    rights: Vec<String>,
    #[serde(default)]
    path_prefix: String,
    #[serde(default)]
    rate_limit: String,
    #[serde(default)]
    ttl_seconds: Option<i64>,
}

#[derive(Deserialize)]
struct RevokeParams {
    #[serde(default)]
    capability_id: String,
}

#[derive(Deserialize)]
struct IntrospectParams {
    #[serde(default)]
    token: String,
}

/// The issuer: key custody, token minting, and the authoritative
/// revocation set.
pub struct IssuerService {
    signing_key: SigningKey,
    revocations: RevocationStore,
    notifier: RevocationNotifier,
}

impl IssuerService {
    /// Creates the service around the node keypair and authoritative store.
    #[must_use]
    pub fn new(
        signing_key: SigningKey,
        revocations: RevocationStore,
        notifier: RevocationNotifier,
    ) -> Self {
        Self {
            signing_key,
            revocations,
            notifier,
        }
    }

    fn handle_issue(&self, request: &Request) -> Response {
        let params: IssueParams = match decode_params(request) {
            Ok(params) => params,
            Err(e) => return Response::failure(request.req_id.clone(), ErrorCode::InvalidArgument, e),
        };

        if params.service.is_empty() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                "missing service param",
            );
        }
        if params.actions.is_empty() && params.rights.is_empty() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                "at least one of actions or rights is required",
            );
        }
        if !params.rate_limit.is_empty() && parse_rate(&params.rate_limit).is_none() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                format!("malformed rate_limit: {:?}", params.rate_limit),
            );
        }

        let ttl_seconds = match params.ttl_seconds {
            Some(ttl) if ttl > 0 => ttl,
            _ => DEFAULT_TTL_SECONDS,
        };

        let (actions, rights) =
            normalize_permissions(&params.service, &params.actions, &params.rights);
        let capability = Capability::new(
            params.service.clone(),
            actions,
            rights,
            Constraints {
                path_prefix: params.path_prefix,
                rate_limit: params.rate_limit,
            },
            chrono::Duration::seconds(ttl_seconds),
        );

        let token = match sign(&capability, &self.signing_key) {
            Ok(token) => token,
            Err(e) => {
                return Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string())
            }
        };

        info!(
            capability_id = %capability.id,
            service = %capability.service,
            rights = ?capability.rights,
            prefix = %capability.constraints.path_prefix,
            "issued capability"
        );
        audit::cap_issued(
            &request.req_id,
            &capability.subject,
            &capability.id,
            &capability.service,
        );

        Response::success(
            request.req_id.clone(),
            json!({
                "token": token,
                "capability_id": capability.id,
                "expires": capability.expires_at.timestamp(),
            }),
        )
    }

    fn handle_revoke(&self, request: &Request) -> Response {
        let params: RevokeParams = match decode_params(request) {
            Ok(params) => params,
            Err(e) => return Response::failure(request.req_id.clone(), ErrorCode::InvalidArgument, e),
        };
        if params.capability_id.is_empty() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                "missing capability_id param",
            );
        }

        // The caller's acknowledgement depends only on the durable
        // authoritative record; delivery to services is asynchronous.
        if let Err(e) = self.revocations.revoke(&params.capability_id) {
            return Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string());
        }
        self.notifier.notify(&params.capability_id);

        info!(capability_id = %params.capability_id, "revoked capability");
        audit::cap_revoked(&request.req_id, &params.capability_id);
        Response::success(request.req_id.clone(), json!({ "status": "revoked" }))
    }

    fn handle_introspect(&self, request: &Request) -> Response {
        let params: IntrospectParams = match decode_params(request) {
            Ok(params) => params,
            Err(e) => return Response::failure(request.req_id.clone(), ErrorCode::InvalidArgument, e),
        };
        if params.token.is_empty() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                "missing token param",
            );
        }

        let claims = match verify(&params.token, &self.signing_key.verifying_key()) {
            Ok(claims) => claims,
            Err(_) => {
                return Response::failure(
                    request.req_id.clone(),
                    ErrorCode::Unauthenticated,
                    "invalid token",
                )
            }
        };

        let expired = claims.is_expired();
        let revoked = self.revocations.is_revoked(&claims.id);
        match serde_json::to_value(&claims) {
            Ok(claims) => Response::success(
                request.req_id.clone(),
                json!({
                    "claims": claims,
                    "expired": expired,
                    "revoked": revoked,
                }),
            ),
            Err(e) => Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string()),
        }
    }
}

impl Dispatch for IssuerService {
    async fn dispatch(&self, request: Request, _peer: &PeerCredentials) -> Response {
        match request.method.as_str() {
            "issuer.issue" => self.handle_issue(&request),
            "issuer.revoke" => self.handle_revoke(&request),
            "issuer.introspect" => self.handle_introspect(&request),
            other => Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                format!("unknown method: {other}"),
            ),
        }
    }
}
