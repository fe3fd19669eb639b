//! Issuer flow over the wire: issuance, introspection, revocation with
//! durable logging, and the retrying fan-out to resource services.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use strata_core::config;
use strata_core::crypto::{generate_keypair, load_public_key, verify, write_public_key};
use strata_core::ipc::{
    send_request, Dispatch, IpcServer, PeerCredentials, Request, Response,
};
use strata_core::revocation::RevocationStore;
use strata_issuer::notifier::RevocationNotifier;
use strata_issuer::service::IssuerService;

struct Harness {
    runtime_dir: tempfile::TempDir,
    socket: PathBuf,
    shutdown: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Harness {
    /// Starts an issuer wired the way the binary wires it: published public
    /// key, durable revocation log, fan-out targeting the runtime dir.
    async fn start() -> Self {
        let runtime_dir = tempfile::tempdir().unwrap();
        let dir = runtime_dir.path();

        let signing_key = generate_keypair();
        write_public_key(&config::public_key_path(dir), &signing_key.verifying_key()).unwrap();

        let revocations =
            RevocationStore::open(&config::revocation_log_path(dir, "issuer")).unwrap();
        let notifier = RevocationNotifier::new(dir.to_path_buf(), vec!["fs".to_string()]);
        let service = Arc::new(IssuerService::new(signing_key, revocations, notifier));

        let socket = config::socket_path(dir, "issuer");
        let server = IpcServer::bind(&socket).unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(service, shutdown.clone()));

        Self {
            runtime_dir,
            socket,
            shutdown,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Response {
        send_request(&self.socket, &Request::new(method, Some(params)))
            .await
            .unwrap()
    }
}

/// Stub resource service recording the revocations it is notified of.
struct RecordingService {
    revoked: Arc<Mutex<Vec<String>>>,
}

impl Dispatch for RecordingService {
    async fn dispatch(&self, request: Request, _peer: &PeerCredentials) -> Response {
        assert_eq!(request.method, "fs.revoke");
        let capability_id = request.params.unwrap()["capability_id"]
            .as_str()
            .unwrap()
            .to_string();
        self.revoked.lock().await.push(capability_id);
        Response::success(request.req_id.clone(), json!({"status": "revoked"}))
    }
}

#[tokio::test]
async fn issued_token_verifies_against_published_key() {
    let harness = Harness::start().await;

    let response = harness
        .call(
            "issuer.issue",
            json!({
                "service": "fs",
                "rights": ["fs.open", "fs.read"],
                "path_prefix": "/tmp",
                "ttl_seconds": 120,
            }),
        )
        .await;
    assert!(response.ok, "{:?}", response.error);
    let result = response.result.unwrap();

    // A resource service verifies with nothing but the published key file.
    let public_key = load_public_key(&config::public_key_path(harness.runtime_dir.path())).unwrap();
    let claims = verify(result["token"].as_str().unwrap(), &public_key).unwrap();
    assert_eq!(claims.service, "fs");
    assert_eq!(claims.constraints.path_prefix, "/tmp");
    assert!(claims.has_right("fs.open"));
    assert!(claims.has_action("open"));
}

#[tokio::test]
async fn issue_validates_shape_over_the_wire() {
    let harness = Harness::start().await;

    let missing_service = harness.call("issuer.issue", json!({"actions": ["open"]})).await;
    assert_eq!(missing_service.error.unwrap().code, 1);

    let no_permissions = harness.call("issuer.issue", json!({"service": "fs"})).await;
    assert_eq!(no_permissions.error.unwrap().code, 1);

    let bad_rate = harness
        .call(
            "issuer.issue",
            json!({"service": "fs", "actions": ["open"], "rate_limit": "2rp"}),
        )
        .await;
    let error = bad_rate.error.unwrap();
    assert_eq!(error.code, 1);
    assert_eq!(error.name, "INVALID_ARGUMENT");
}

#[tokio::test]
async fn revocation_survives_restart_via_log() {
    let harness = Harness::start().await;

    let response = harness
        .call("issuer.revoke", json!({"capability_id": "cap-restart"}))
        .await;
    assert!(response.ok);

    // A fresh store over the same log sees the revocation.
    let log = config::revocation_log_path(harness.runtime_dir.path(), "issuer");
    let reopened = RevocationStore::open(&log).unwrap();
    assert!(reopened.is_revoked("cap-restart"));
}

#[tokio::test]
async fn fanout_retries_until_service_appears() {
    let harness = Harness::start().await;
    let fs_socket = config::socket_path(harness.runtime_dir.path(), "fs");

    // Revoke while the fs service is down: the ack must not wait for it.
    let response = harness
        .call("issuer.revoke", json!({"capability_id": "cap-late"}))
        .await;
    assert!(response.ok);

    // Bring the fs service up after the first delivery attempts failed.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let revoked = Arc::new(Mutex::new(Vec::new()));
    let stub = Arc::new(RecordingService {
        revoked: Arc::clone(&revoked),
    });
    let server = IpcServer::bind(&fs_socket).unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(stub, shutdown.clone()));

    // The retrying notifier converges once the socket exists.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if revoked.lock().await.contains(&"cap-late".to_string()) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "notification never arrived"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    shutdown.cancel();
}
