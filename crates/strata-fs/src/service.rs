//! Request dispatch for the filesystem service.
//!
//! Per-request procedure: verify the token cryptographically, check expiry,
//! apply the centralized authorization decision, consult the local
//! revocation replica, and only then touch the filesystem. Any check
//! failure returns without touching the underlying resource.

use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use strata_core::audit;
use strata_core::capability::Capability;
use strata_core::crypto::verify;
use strata_core::handle::{HandleError, HandleTable};
use strata_core::ipc::{
    decode_params, Dispatch, ErrorCode, PeerCredentials, Request, Response,
};
use strata_core::policy::{AuthContext, PolicyEngine};
use strata_core::revocation::RevocationStore;

/// Service name; the prefix of every method this service handles.
pub const SERVICE_NAME: &str = "fs";

/// Default read size when the client does not specify one.
const DEFAULT_READ_SIZE: u64 = 4096;

/// Read-size cap keeping the base64-encoded response inside the 1 MiB
/// frame limit.
const MAX_READ_SIZE: u64 = 256 * 1024;

#[derive(Deserialize)]
struct OpenParams {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct ReadParams {
    #[serde(default)]
    handle: String,
    #[serde(default)]
    offset: u64,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct RevokeParams {
    #[serde(default)]
    capability_id: String,
}

/// The filesystem service: verifier, policy glue, handle table, and the
/// local revocation replica.
pub struct FsService {
    public_key: VerifyingKey,
    handles: Arc<HandleTable>,
    revocations: RevocationStore,
    policy: PolicyEngine,
    /// Effective uid this service runs as; internal endpoints only accept
    /// peers with the same uid.
    service_uid: u32,
}

impl FsService {
    /// Creates the service around the issuer's verification key and a
    /// (possibly replayed) revocation replica.
    #[must_use]
    pub fn new(public_key: VerifyingKey, revocations: RevocationStore) -> Self {
        Self {
            public_key,
            handles: Arc::new(HandleTable::new()),
            revocations,
            policy: PolicyEngine::new(),
            service_uid: nix::unistd::Uid::effective().as_raw(),
        }
    }

    /// The handle table, shared with the shutdown path.
    #[must_use]
    pub fn handles(&self) -> Arc<HandleTable> {
        Arc::clone(&self.handles)
    }

    /// Verifies the request's token, if any.
    ///
    /// Returns `Ok(None)` when no token is present (the policy core turns
    /// that into `Unauthenticated`); returns an error response when a token
    /// is present but cryptographically invalid or expired. Crypto internals
    /// never reach the client.
    fn extract_claims(&self, request: &Request) -> Result<Option<Capability>, Response> {
        let Some(token) = request.auth.as_ref().map(|a| a.token.as_str()) else {
            return Ok(None);
        };
        if token.is_empty() {
            return Ok(None);
        }

        let claims = verify(token, &self.public_key).map_err(|_| {
            audit::auth_denied(&request.req_id, None, None, &request.method, "invalid token");
            Response::failure(
                request.req_id.clone(),
                ErrorCode::Unauthenticated,
                "invalid token",
            )
        })?;

        if claims.is_expired() {
            audit::auth_denied(
                &request.req_id,
                Some(&claims.subject),
                Some(&claims.id),
                &request.method,
                "token expired",
            );
            return Err(Response::failure(
                request.req_id.clone(),
                ErrorCode::Unauthenticated,
                "token expired",
            ));
        }

        Ok(Some(claims))
    }

    /// Runs the centralized decision and the revocation check, emitting
    /// audit events on denial.
    fn authorize(
        &self,
        request: &Request,
        claims: Option<&Capability>,
        method: &str,
        ctx: &AuthContext<'_>,
    ) -> Result<(), Response> {
        if let Err(err) = self.policy.authorize(claims, method, ctx) {
            audit::auth_denied(
                &request.req_id,
                claims.map(|c| c.subject.as_str()),
                claims.map(|c| c.id.as_str()),
                method,
                &err.message,
            );
            return Err(Response::failure(
                request.req_id.clone(),
                err.code,
                err.message,
            ));
        }

        // The authorize call above rejects absent claims.
        let claims = claims.expect("claims present after authorization");
        if self.revocations.is_revoked(&claims.id) {
            audit::op_denied(
                &request.req_id,
                Some(&claims.subject),
                Some(&claims.id),
                method,
                ctx.path,
                "capability revoked",
            );
            return Err(Response::failure(
                request.req_id.clone(),
                ErrorCode::PermissionDenied,
                "capability revoked",
            ));
        }
        Ok(())
    }

    async fn handle_open(&self, request: &Request) -> Response {
        let claims = match self.extract_claims(request) {
            Ok(claims) => claims,
            Err(response) => return response,
        };

        let params: OpenParams = match decode_params(request) {
            Ok(params) => params,
            Err(e) => return Response::failure(request.req_id.clone(), ErrorCode::InvalidArgument, e),
        };
        if params.path.is_empty() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                "missing path param",
            );
        }

        let ctx = AuthContext::with_path(&params.path);
        if let Err(response) = self.authorize(request, claims.as_ref(), "fs.open", &ctx) {
            return response;
        }
        let claims = claims.expect("authorized claims");

        let handles = Arc::clone(&self.handles);
        let path = PathBuf::from(&params.path);
        let capability_id = claims.id.clone();
        let opened = tokio::task::spawn_blocking(move || handles.open(&path, &capability_id)).await;

        match opened {
            Ok(Ok(handle)) => {
                info!(path = %params.path, handle = %handle, capability_id = %claims.id, "opened");
                audit::op_ok(
                    &request.req_id,
                    &claims.subject,
                    &claims.id,
                    "fs.open",
                    Some(&params.path),
                );
                Response::success(request.req_id.clone(), json!({ "handle": handle }))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Response::failure(
                request.req_id.clone(),
                ErrorCode::NotFound,
                "file not found",
            ),
            Ok(Err(e)) => {
                Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string())
            }
            Err(e) => Response::failure(
                request.req_id.clone(),
                ErrorCode::Internal,
                format!("open task failed: {e}"),
            ),
        }
    }

    async fn handle_read(&self, request: &Request) -> Response {
        let claims = match self.extract_claims(request) {
            Ok(claims) => claims,
            Err(response) => return response,
        };

        // No path context: the handle was already opened with permission.
        if let Err(response) =
            self.authorize(request, claims.as_ref(), "fs.read", &AuthContext::NONE)
        {
            return response;
        }
        let claims = claims.expect("authorized claims");

        let params: ReadParams = match decode_params(request) {
            Ok(params) => params,
            Err(e) => return Response::failure(request.req_id.clone(), ErrorCode::InvalidArgument, e),
        };
        if params.handle.is_empty() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                "missing handle param",
            );
        }

        let entry = match self.handles.get(&params.handle) {
            Ok(entry) => entry,
            Err(HandleError::NotFound) => {
                return Response::failure(
                    request.req_id.clone(),
                    ErrorCode::NotFound,
                    "invalid handle",
                )
            }
            Err(HandleError::Io(e)) => {
                return Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string())
            }
        };

        // Handle binding: only the capability that opened the handle may
        // use it, even if another token carries the same rights.
        if entry.capability_id != claims.id {
            audit::op_denied(
                &request.req_id,
                Some(&claims.subject),
                Some(&claims.id),
                "fs.read",
                entry.path.to_str(),
                "handle not bound to this capability",
            );
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::PermissionDenied,
                "handle not bound to this capability",
            );
        }

        if self.revocations.is_revoked(&entry.capability_id) {
            audit::op_denied(
                &request.req_id,
                Some(&claims.subject),
                Some(&claims.id),
                "fs.read",
                entry.path.to_str(),
                "capability revoked",
            );
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::PermissionDenied,
                "capability revoked",
            );
        }

        let size = match params.size {
            None | Some(0) => DEFAULT_READ_SIZE,
            Some(size) => size.min(MAX_READ_SIZE),
        };
        let offset = params.offset;
        let path = entry.path.clone();

        let read = tokio::task::spawn_blocking(move || {
            #[allow(clippy::cast_possible_truncation)] // Capped at MAX_READ_SIZE.
            let mut buf = vec![0u8; size as usize];
            entry.read_at(&mut buf, offset).map(|n| {
                buf.truncate(n);
                buf
            })
        })
        .await;

        match read {
            Ok(Ok(data)) => {
                audit::op_ok(
                    &request.req_id,
                    &claims.subject,
                    &claims.id,
                    "fs.read",
                    path.to_str(),
                );
                Response::success(
                    request.req_id.clone(),
                    json!({
                        "data": STANDARD.encode(&data),
                        "bytes_read": data.len(),
                    }),
                )
            }
            Ok(Err(e)) => {
                Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string())
            }
            Err(e) => Response::failure(
                request.req_id.clone(),
                ErrorCode::Internal,
                format!("read task failed: {e}"),
            ),
        }
    }

    async fn handle_list(&self, request: &Request) -> Response {
        let claims = match self.extract_claims(request) {
            Ok(claims) => claims,
            Err(response) => return response,
        };

        let params: ListParams = match decode_params(request) {
            Ok(params) => params,
            Err(e) => return Response::failure(request.req_id.clone(), ErrorCode::InvalidArgument, e),
        };
        if params.path.is_empty() {
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                "missing path param",
            );
        }

        let ctx = AuthContext::with_path(&params.path);
        if let Err(response) = self.authorize(request, claims.as_ref(), "fs.list", &ctx) {
            return response;
        }
        let claims = claims.expect("authorized claims");

        let path = PathBuf::from(&params.path);
        let listed = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(&path)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let mut item = json!({
                    "name": entry.file_name().to_string_lossy(),
                    "is_dir": file_type.is_dir(),
                });
                if let Ok(metadata) = entry.metadata() {
                    item["size"] = json!(metadata.len());
                }
                entries.push(item);
            }
            Ok::<_, std::io::Error>(entries)
        })
        .await;

        match listed {
            Ok(Ok(entries)) => {
                audit::op_ok(
                    &request.req_id,
                    &claims.subject,
                    &claims.id,
                    "fs.list",
                    Some(&params.path),
                );
                Response::success(request.req_id.clone(), json!({ "entries": entries }))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Response::failure(
                request.req_id.clone(),
                ErrorCode::NotFound,
                "directory not found",
            ),
            Ok(Err(e)) => {
                Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string())
            }
            Err(e) => Response::failure(
                request.req_id.clone(),
                ErrorCode::Internal,
                format!("list task failed: {e}"),
            ),
        }
    }

    /// Internal revocation notification from the issuer. Authenticated by
    /// peer credentials: the connecting process must run as the same uid as
    /// this service.
    fn handle_revoke(&self, request: &Request, peer: &PeerCredentials) -> Response {
        if peer.uid != self.service_uid {
            audit::auth_denied(
                &request.req_id,
                None,
                None,
                "fs.revoke",
                "peer uid not authorized",
            );
            return Response::failure(
                request.req_id.clone(),
                ErrorCode::PermissionDenied,
                "peer not authorized for internal revocation",
            );
        }

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

        if let Err(e) = self.revocations.revoke(&params.capability_id) {
            return Response::failure(request.req_id.clone(), ErrorCode::Internal, e.to_string());
        }
        self.policy.evict_capability(&params.capability_id);

        info!(capability_id = %params.capability_id, "capability revoked, handles invalidated");
        audit::cap_revoked(&request.req_id, &params.capability_id);
        Response::success(request.req_id.clone(), json!({ "status": "revoked" }))
    }
}

impl Dispatch for FsService {
    async fn dispatch(&self, request: Request, peer: &PeerCredentials) -> Response {
        match request.method.as_str() {
            "fs.open" => self.handle_open(&request).await,
            "fs.read" => self.handle_read(&request).await,
            "fs.list" => self.handle_list(&request).await,
            "fs.revoke" => self.handle_revoke(&request, peer),
            other => Response::failure(
                request.req_id.clone(),
                ErrorCode::InvalidArgument,
                format!("unknown method: {other}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_core::crypto::generate_keypair;

    use super::*;

    fn service() -> FsService {
        FsService::new(
            generate_keypair().verifying_key(),
            RevocationStore::in_memory(),
        )
    }

    fn own_peer() -> PeerCredentials {
        PeerCredentials {
            uid: nix::unistd::Uid::effective().as_raw(),
            gid: nix::unistd::Gid::effective().as_raw(),
            pid: None,
        }
    }

    #[tokio::test]
    async fn unknown_method_is_invalid_argument() {
        let service = service();
        let response = service
            .dispatch(Request::new("fs.write", None), &own_peer())
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::InvalidArgument.code());
        assert!(error.message.contains("unknown method"));
    }

    #[tokio::test]
    async fn missing_token_is_unauthenticated() {
        let service = service();
        let request = Request::new("fs.open", Some(json!({"path": "/tmp/x"})));
        let response = service.dispatch(request, &own_peer()).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::Unauthenticated.code());
        assert_eq!(error.name, "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn garbage_token_is_rejected_without_detail() {
        let service = service();
        let request =
            Request::new("fs.open", Some(json!({"path": "/tmp/x"}))).with_token("v2.public.garbage");
        let response = service.dispatch(request, &own_peer()).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::Unauthenticated.code());
        assert_eq!(error.message, "invalid token");
    }

    #[tokio::test]
    async fn internal_revoke_rejects_foreign_uid() {
        let service = service();
        let peer = PeerCredentials {
            uid: service.service_uid.wrapping_add(1),
            gid: 0,
            pid: None,
        };
        let request = Request::new("fs.revoke", Some(json!({"capability_id": "abc"})));
        let response = service.dispatch(request, &peer).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::PermissionDenied.code());
        assert!(!service.revocations.is_revoked("abc"));
    }

    #[tokio::test]
    async fn internal_revoke_accepts_own_uid_and_is_idempotent() {
        let service = service();
        let request = Request::new("fs.revoke", Some(json!({"capability_id": "abc"})));
        let response = service.dispatch(request.clone(), &own_peer()).await;
        assert!(response.ok);
        assert!(service.revocations.is_revoked("abc"));

        let again = service.dispatch(request, &own_peer()).await;
        assert!(again.ok);
    }
}
