//! Revocation fan-out to resource services.
//!
//! The issuer's revoke acknowledgement depends only on the authoritative
//! set; notification delivery happens in the background. Each service is
//! notified with an idempotent `<service>.revoke` call retried on a fixed
//! interval until the service acknowledges or the attempt budget runs out.
//! Once a service has acknowledged, its own
//! revocation log makes the denial survive restarts; a service that misses
//! every attempt honors the capability only until it expires.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use strata_core::config;
use strata_core::ipc::{send_request, Request};

/// Retry budget per service per revocation.
const MAX_ATTEMPTS: u32 = 60;

/// Delay between attempts.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Fans revocation notifications out to the node's resource services.
#[derive(Debug, Clone)]
pub struct RevocationNotifier {
    runtime_dir: PathBuf,
    services: Vec<String>,
}

impl RevocationNotifier {
    /// Creates a notifier for the given resource services.
    #[must_use]
    pub fn new(runtime_dir: PathBuf, services: Vec<String>) -> Self {
        Self {
            runtime_dir,
            services,
        }
    }

    /// Spawns one background delivery task per service and returns
    /// immediately.
    pub fn notify(&self, capability_id: &str) {
        for service in &self.services {
            let socket = config::socket_path(&self.runtime_dir, service);
            let method = format!("{service}.revoke");
            let capability_id = capability_id.to_string();
            let service = service.clone();

            tokio::spawn(async move {
                for attempt in 1..=MAX_ATTEMPTS {
                    let request = Request::new(
                        method.as_str(),
                        Some(json!({ "capability_id": capability_id })),
                    );
                    match send_request(&socket, &request).await {
                        Ok(response) if response.ok => {
                            debug!(service = %service, capability_id = %capability_id, attempt, "revocation acknowledged");
                            return;
                        }
                        Ok(response) => {
                            warn!(
                                service = %service,
                                capability_id = %capability_id,
                                attempt,
                                error = ?response.error,
                                "revocation rejected, retrying"
                            );
                        }
                        Err(e) => {
                            debug!(
                                service = %service,
                                capability_id = %capability_id,
                                attempt,
                                "revocation delivery failed: {e}"
                            );
                        }
                    }
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                warn!(
                    service = %service,
                    capability_id = %capability_id,
                    "revocation notification exhausted retries"
                );
            });
        }
    }
}
