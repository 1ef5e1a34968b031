//! Raw request forwarding without schema processing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;
use schemarpc_core::HttpMethod;
use tracing::{debug, warn};
use url::Url;

use crate::error::RemoteError;
use crate::request::base_path;
use crate::transport::{HttpRequest, ReqwestTransport, RequestBody, Transport};

/// Idle connections kept by a passthrough client.
const PASSTHROUGH_POOL_SIZE: usize = 4;

/// Response headers copied back to the caller.
const ALLOWED_RESPONSE_HEADERS: [&str; 1] = ["content-type"];

/// A forwarded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedResponse {
    pub status: u16,
    /// Allowed response headers, one value each.
    pub headers: IndexMap<String, String>,
    pub body: Bytes,
}

/// Forwards requests verbatim to a base URL.
pub struct PassthroughClient {
    base_url: Url,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for PassthroughClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl PassthroughClient {
    /// # Errors
    ///
    /// Fails on an unparsable `base_url` or when the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let transport = Arc::new(ReqwestTransport::new(timeout, PASSTHROUGH_POOL_SIZE)?);
        Self::with_transport(base_url, transport)
    }

    /// # Errors
    ///
    /// Fails on an unparsable `base_url`.
    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url).map_err(|source| RemoteError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        Ok(Self { base_url, transport })
    }

    /// Sends `method path?query` under the base URL with the given headers and body.
    ///
    /// Header pairs that are not valid HTTP headers are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMethod` for methods other than GET, POST, PUT and
    /// DELETE, and `Connection` when the request cannot be delivered.
    pub async fn forward(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<ForwardedResponse, RemoteError> {
        let method: HttpMethod = method.parse()?;

        let mut url = self.base_url.clone();
        url.set_path(&format!("{}{path}", base_path(&self.base_url)));
        url.set_query(query.filter(|q| !q.is_empty()));

        let mut request = HttpRequest::new(method, url);
        request.headers = request_headers(headers);
        if let Some(body) = body {
            request.body = RequestBody::Raw(body);
        }

        let target = request.url.to_string();
        debug!(%method, url = %target, "forwarding request");
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|source| RemoteError::Connection { url: target, source })?;

        Ok(ForwardedResponse {
            status: response.status,
            headers: filter_response_headers(&response.headers),
            body: response.body,
        })
    }
}

fn request_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "dropping invalid header"),
        }
    }
    headers
}

/// Keeps allowed headers, normalizing multi-valued ones to their first value.
fn filter_response_headers(headers: &HeaderMap) -> IndexMap<String, String> {
    ALLOWED_RESPONSE_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some(((*name).to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use http::header::CONTENT_TYPE;

    use super::*;
    use crate::testing::RecordingTransport;
    use crate::transport::HttpResponse;

    fn transport() -> Arc<RecordingTransport> {
        RecordingTransport::new(|_| {
            let mut response = HttpResponse::new(201, r#"{"ok":true}"#);
            response
                .headers
                .append(CONTENT_TYPE, HeaderValue::from_static("application/json;charset=utf-8"));
            response
                .headers
                .append(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            response
                .headers
                .insert("x-internal", HeaderValue::from_static("secret"));
            Ok(response)
        })
    }

    #[tokio::test]
    async fn forwards_under_base_path() {
        let transport = transport();
        let client = PassthroughClient::with_transport("http://media.test/api/1.0/", transport.clone()).unwrap();

        let response = client
            .forward(
                "post",
                "/avatars",
                Some("size=large"),
                &[("x-request-id".to_string(), "abc".to_string())],
                Some(Bytes::from_static(b"payload")),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.body, Bytes::from_static(br#"{"ok":true}"#));

        let request = transport.last().unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url.as_str(), "http://media.test/api/1.0/avatars?size=large");
        assert_eq!(request.headers.get("x-request-id").unwrap(), "abc");
        assert_eq!(request.body, RequestBody::Raw(Bytes::from_static(b"payload")));
    }

    #[tokio::test]
    async fn only_content_type_survives_with_first_value() {
        let client = PassthroughClient::with_transport("http://media.test", transport()).unwrap();
        let response = client.forward("GET", "/x", None, &[], None).await.unwrap();
        assert_eq!(response.headers.len(), 1);
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("application/json;charset=utf-8")
        );
    }

    #[tokio::test]
    async fn binary_bodies_pass_through_unchanged() {
        const PNG: &[u8] = &[137, 80, 78, 71, 13, 10, 26, 10, 0, 255, 254];
        let transport = RecordingTransport::new(|_| {
            let mut response = HttpResponse::new(200, Bytes::from_static(PNG));
            response
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
            Ok(response)
        });
        let client = PassthroughClient::with_transport("http://media.test", transport).unwrap();

        let response = client.forward("GET", "/avatar.png", None, &[], None).await.unwrap();
        assert_eq!(response.body.as_ref(), PNG);
        assert_eq!(response.headers.get("content-type").map(String::as_str), Some("image/png"));
    }

    #[tokio::test]
    async fn rejects_unknown_methods() {
        let client = PassthroughClient::with_transport("http://media.test", transport()).unwrap();
        let err = client.forward("PATCH", "/x", None, &[], None).await.unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedMethod(_)));
    }

    #[test]
    fn invalid_base_url() {
        assert!(matches!(
            PassthroughClient::with_transport("not a url", transport()),
            Err(RemoteError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn invalid_request_headers_are_dropped() {
        let headers = request_headers(&[
            ("bad header".to_string(), "v".to_string()),
            ("x-ok".to_string(), "1".to_string()),
        ]);
        assert_eq!(headers.len(), 1);
    }
}
