//! [`Transport`] over a pooled `reqwest` client.

use std::time::Duration;

use ::reqwest::multipart::{Form, Part};
use ::reqwest::{Client, Method};
use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};
use schemarpc_core::{HttpMethod, Param};
use tracing::debug;

use super::{HttpRequest, HttpResponse, RequestBody, Transport, TransportError};

/// Pooled HTTP transport with a fixed timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport.
    ///
    /// `timeout` bounds both connecting and the whole request; `pool_size`
    /// caps idle connections kept per host.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Other` when the TLS backend cannot be initialized.
    pub fn new(timeout: Duration, pool_size: usize) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(pool_size)
            .build()
            .map_err(|err| TransportError::Other(err.into()))?;
        Ok(Self { client })
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn multipart_form(fields: Vec<(String, Param)>) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for (name, value) in fields {
        form = match value {
            Param::File(file) => {
                let part = Part::bytes(file.data.to_vec())
                    .file_name(file.filename)
                    .mime_str(&file.content_type)
                    .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
                form.part(name, part)
            }
            other => form.text(name, other.scalar_text().unwrap_or_default()),
        };
    }
    Ok(form)
}

fn classify(err: &::reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        debug!(%method, %url, "sending request");

        let builder = self
            .client
            .request(to_method(method), url)
            .headers(headers);
        let builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Form(text) => builder
                .header(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                )
                .body(text),
            RequestBody::Json(text) => builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(text),
            RequestBody::Multipart(fields) => builder.multipart(multipart_form(fields)?),
            RequestBody::Raw(bytes) => builder.body(bytes),
        };

        let response = builder.send().await.map_err(|err| classify(&err))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|err| classify(&err))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
