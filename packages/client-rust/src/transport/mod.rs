//! HTTP transport boundary.
//!
//! The client builds a complete [`HttpRequest`] (URL, headers, encoded body)
//! and hands it to a [`Transport`]. [`ReqwestTransport`] is the production
//! implementation; tests substitute a recording double.

pub mod reqwest;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use schemarpc_core::{HttpMethod, Param};
use url::Url;

pub use self::reqwest::ReqwestTransport;

/// Request body, already encoded.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` text.
    Form(String),
    /// `application/json` text.
    Json(String),
    /// Flattened multipart fields; file values become file parts.
    Multipart(Vec<(String, Param)>),
    /// Opaque bytes forwarded as given.
    Raw(Bytes),
}

/// A fully built outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }
}

/// A received response. The body is kept exactly as sent.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport failures. The client wraps these with the target URL.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Sends requests over HTTP.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one round trip. Non-2xx statuses are responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
