//! Wire protocol types for the provider IPC channel.
//!
//! Requests and responses travel as length-delimited JSON frames over a
//! Unix socket. The envelope carries a numeric id so a client can match
//! responses to requests; the payload types mirror what a secrets-mounting
//! driver sends to a provider.

use serde::{Deserialize, Serialize};

/// One framed call from the driver side. `method` selects the operation
/// (`mount`, `version`); `params` carries the method-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The error half of a response: a stable machine-readable code (e.g.
/// `malformed_attributes`) plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObj {
    pub code: String,
    pub message: String,
}

/// Response envelope. A well-formed response sets exactly one of `result`
/// and `error`; `id` echoes the request when it could be decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObj>,
}

impl Response {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<u64>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorObj {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Collapse the envelope into a `Result`, preserving the provider's
    /// error code for typed clients. An empty result decodes as `null`.
    pub fn into_result(self) -> Result<serde_json::Value, ErrorObj> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

// ---------------------------------------------------------------------------
// Mount payloads
// ---------------------------------------------------------------------------

/// A mount request as issued by the driver under test.
///
/// Only `attributes` is interpreted by the mock; the remaining fields are
/// part of the driver contract and carried through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRequest {
    /// JSON-encoded string map. The `objects` value is a YAML blob naming
    /// the objects to resolve.
    #[serde(default)]
    pub attributes: String,

    /// JSON-encoded string map of driver-forwarded secrets. Opaque to the mock.
    #[serde(default)]
    pub secrets: String,

    /// File mode for mounted files (e.g. `"640"`). Unused by content logic.
    #[serde(default)]
    pub permission: String,

    /// Target mount path on the driver side. Unused by content logic.
    #[serde(default)]
    pub target_path: String,
}

/// Version record for one requested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// Object identity, `"<type>/<name>"`.
    pub id: String,
    /// Opaque label, `"v" + epoch`.
    pub version: String,
}

/// One resolved file in the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedFile {
    /// Relative path, derived from the object name.
    pub path: String,
    /// Raw content bytes.
    pub contents: Vec<u8>,
}

/// A mount response. Both sequences are ordered exactly as requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountResponse {
    pub object_version: Vec<ObjectVersion>,
    pub files: Vec<MountedFile>,
}

/// Provider identification, the companion operation to `mount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    /// Provider protocol version.
    pub version: String,
    pub runtime_name: String,
    pub runtime_version: String,
}
