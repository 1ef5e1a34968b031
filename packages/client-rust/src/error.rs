use schemarpc_core::{DecodeError, EncodeError, Message, UnsupportedMethod};

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    UnsupportedMethod(#[from] UnsupportedMethod),
    /// The request could not be delivered.
    #[error("remote connection error: {url}")]
    Connection {
        url: String,
        #[source]
        source: TransportError,
    },
    /// The service answered with a severe status (500, 501, 503).
    #[error("remote service failed with status {status}")]
    Severe { status: u16, messages: Vec<Message> },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("service `{code_name}` has no operation `{operation}`")]
    UnknownOperation { code_name: String, operation: String },
    #[error("failed to load service definition from {location}")]
    DefinitionLoad {
        location: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("service definition at {url} answered with status {status}")]
    DefinitionFetch { url: String, status: u16 },
    #[error("invalid url `{url}`")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("service directory has been dropped")]
    DirectoryClosed,
}

impl RemoteError {
    /// Remote messages attached to a severe error; empty otherwise.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::Severe { messages, .. } => messages,
            _ => &[],
        }
    }
}
