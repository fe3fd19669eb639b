//! Request/response envelopes and the error catalog.
//!
//! Every response with `ok = false` carries both a stable numeric `code` and
//! a stable `name` so clients can branch deterministically, plus an optional
//! `details` object.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Stable error catalog shared by all Strata services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Missing or malformed parameters, bad method string, version mismatch.
    InvalidArgument,
    /// No token, malformed token, signature invalid, expired.
    Unauthenticated,
    /// Wrong service, missing right, constraint violation, revoked.
    PermissionDenied,
    /// File, directory, or handle unknown.
    NotFound,
    /// Underlying I/O or signing failure.
    Internal,
    /// Dependent service unreachable.
    Unavailable,
    /// Rate bucket empty.
    ResourceExhausted,
    /// Conflicting concurrent operation.
    Conflict,
}

impl ErrorCode {
    /// Stable numeric code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::InvalidArgument => 1,
            Self::Unauthenticated => 2,
            Self::PermissionDenied => 3,
            Self::NotFound => 4,
            Self::Internal => 5,
            Self::Unavailable => 6,
            Self::ResourceExhausted => 7,
            Self::Conflict => 8,
        }
    }

    /// Stable symbolic name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Conflict => "CONFLICT",
        }
    }
}

/// Bearer token attached to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    /// The capability token string.
    pub token: String,
}

/// Envelope for all IPC calls between Strata services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version; must be [`PROTOCOL_VERSION`].
    pub v: u32,
    /// Caller-chosen request identifier, echoed in the response.
    pub req_id: String,
    /// Target operation, `"<service>.<action>"`.
    pub method: String,
    /// Optional bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    /// Method-specific parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Builds a request with a fresh random `req_id`.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        let mut id = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut id);
        Self {
            v: PROTOCOL_VERSION,
            req_id: hex::encode(id),
            method: method.into(),
            auth: None,
            params,
        }
    }

    /// Attaches a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Auth {
            token: token.into(),
        });
        self
    }
}

/// Structured error body carried by failed responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable numeric code from the error catalog.
    pub code: u32,
    /// Stable symbolic name from the error catalog.
    pub name: String,
    /// Human-readable cause. Never contains crypto internals or secrets.
    pub message: String,
    /// Optional machine-readable context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Envelope for all IPC replies. `result` is present iff `ok`; `error` is
/// present iff not `ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version.
    pub v: u32,
    /// Echo of the request's `req_id`.
    pub req_id: String,
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Operation result when `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description when not `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Builds a success response.
    #[must_use]
    pub fn success(req_id: impl Into<String>, result: Value) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            req_id: req_id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Builds a failure response.
    #[must_use]
    pub fn failure(req_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            req_id: req_id.into(),
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code: code.code(),
                name: code.name().to_string(),
                message: message.into(),
                details: None,
            }),
        }
    }

    /// Builds a failure response with a `details` object.
    #[must_use]
    pub fn failure_with_details(
        req_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        let mut response = Self::failure(req_id, code, message);
        if let Some(error) = response.error.as_mut() {
            error.details = Some(details);
        }
        response
    }
}

/// Decodes a request's `params` into a typed structure.
///
/// Absent `params` decodes as an empty object, so methods with all-optional
/// parameters accept bare requests.
///
/// # Errors
///
/// Returns a description of the shape mismatch suitable for an
/// `InvalidArgument` response.
pub fn decode_params<T: serde::de::DeserializeOwned>(request: &Request) -> Result<T, String> {
    let params = request
        .params
        .clone()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
}
