//! Shared test doubles and fixtures.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{ServiceSettings, ServicesConfig};
use crate::directory::ServiceDirectory;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Transport double that records every request and answers from a handler.
pub(crate) struct RecordingTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingTransport {
    pub(crate) fn new(
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answers every request with the same status and body.
    pub(crate) fn fixed(status: u16, body: &str) -> Arc<Self> {
        let body = body.to_string();
        Self::new(move |_| Ok(HttpResponse::new(status, body.clone())))
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of recorded requests whose URL path equals `path`.
    pub(crate) fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url.path() == path)
            .count()
    }

    pub(crate) fn last(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = (self.handler)(&request);
        self.requests.lock().push(request);
        response
    }
}

// ---------------------------------------------------------------------------
// Service fixtures
// ---------------------------------------------------------------------------

pub(crate) const VPOS_DOC_URL: &str = "http://docs.test/vpos/doc/0.1";
pub(crate) const VPOS_API_URL: &str = "http://api.test/vpos/api/0.1/";
pub(crate) const PUBLIC_KEY: &str = "1234567";
pub(crate) const PRIVATE_KEY: &str = "CAFEBABE";

pub(crate) const VPOS_DEFINITION: &str = r#"{
    "service": { "service": "Vpos", "code_name": "vpos", "version": "0.1" },
    "operations": {
        "users": {
            "get_user": {
                "method": "get",
                "path": "/users/:user_id",
                "response": [
                    { "element": "user", "type": "user" },
                    { "element": "nickname", "type": "string", "required": false, "default": "anon" }
                ]
            },
            "create_user": {
                "method": "post",
                "path": "/users",
                "response": [ { "element": "user_id", "type": "integer" } ]
            },
            "patch_user": { "method": "patch", "path": "/users/:user_id" }
        }
    },
    "proxy_operations": {
        "media": {
            "get_avatar": { "method": "get", "path": "/avatars/:id", "service": "media" }
        }
    },
    "representations": {
        "user": [
            { "field": "email", "type": "string" },
            { "field": "ad", "type": "string", "required": false }
        ]
    },
    "glossary": {
        "address": { "short_name": "ad" },
        "full_name": { "short_name": "fn" }
    }
}"#;

pub(crate) const MEDIA_PROXY_DEFINITION: &str = r#"{
    "service": { "code_name": "media", "version": "1.0" },
    "operations": {
        "media": {
            "get_avatar": {
                "method": "get",
                "path": "/avatars/:id",
                "response": [ { "element": "avatar", "type": "avatar" } ]
            }
        }
    },
    "representations": { "avatar": [ { "field": "url", "type": "string" } ] }
}"#;

/// Routes requests for the `vpos` fixture service by URL path.
pub(crate) fn vpos_transport() -> Arc<RecordingTransport> {
    RecordingTransport::new(|request| {
        let ok = |body: &'static str| -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse::new(200, body))
        };
        match request.url.path() {
            "/vpos/doc/0.1" => ok(VPOS_DEFINITION),
            "/vpos/doc/0.1/proxy/media" => ok(MEDIA_PROXY_DEFINITION),
            "/vpos/api/0.1/users/42" => ok(r#"{"status":"ok","user":{"email":"x@y.com","ad":"Main St"}}"#),
            "/vpos/api/0.1/users/404" => Ok(HttpResponse::new(
                404,
                r#"{"status":"error","messages":[{"key":"UserNotFound","dsc":"no such user","level":"error"}]}"#,
            )),
            "/vpos/api/0.1/users/500" => Ok(HttpResponse::new(
                500,
                r#"{"status":"error","messages":[{"key":"Boom","dsc":"exploded","level":"error"}]}"#,
            )),
            "/vpos/api/0.1/users/503" => Ok(HttpResponse::new(503, "Service Unavailable")),
            "/vpos/api/0.1/users" => ok(r#"{"status":"ok","user_id":7}"#),
            "/vpos/api/0.1/avatars/7" => ok(r#"{"status":"ok","avatar":{"url":"http://img/7.png"}}"#),
            other => Err(TransportError::Connection(format!("refused: {other}"))),
        }
    })
}

pub(crate) fn vpos_settings() -> ServiceSettings {
    ServiceSettings::new(VPOS_DOC_URL, VPOS_API_URL).with_keys(PUBLIC_KEY, PRIVATE_KEY)
}

/// Directory configured with the `vpos` service and the given transport.
pub(crate) fn vpos_directory(transport: Arc<RecordingTransport>) -> Arc<ServiceDirectory> {
    let mut config = ServicesConfig::default();
    config.insert("vpos", "0.1", vpos_settings());
    Arc::new(
        ServiceDirectory::new(crate::config::RemoteSettings::default())
            .with_configuration(config)
            .with_transport(transport),
    )
}
