//! Serialized form of a remote response.
//!
//! A decoded response holds typed values that do not round-trip through JSON
//! on their own. The envelope keeps the raw body plus enough identity to
//! decode it again later with
//! [`ServiceDirectory::rebuild_response`](crate::directory::ServiceDirectory::rebuild_response).

use serde::{Deserialize, Serialize};

/// Raw response plus the service and operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status_code: u16,
    pub body: String,
    pub service_code_name: String,
    pub service_version: String,
    pub operation_namespace: String,
    pub operation_code_name: String,
}

impl ResponseEnvelope {
    /// # Errors
    ///
    /// Fails only if serialization of plain strings fails.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// # Errors
    ///
    /// Returns an error when `text` is not an envelope.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
