//! Request signing.
//!
//! A signature is the hex SHA-1 digest of
//!
//! ```text
//! <private_key>\n<date>\n<METHOD>\n<path>
//! ```
//!
//! where `<date>` is the value sent in the `Date` header and `<path>` is the
//! request path without its query string. In session mode a second signature
//! is made the same way with the negotiated session key and sent in
//! `X-BAAS-AUTH`. The session key is `sha1hex("<private_key>\n<seed>")`, where
//! the seed arrives in a response's `X-Baas-Session-Seed` header.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, DATE};
use schemarpc_core::HttpMethod;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use super::store::SessionStore;
use crate::config::{AuthHeaderStyle, SigningMode};

/// Header carrying the session signature.
pub const SESSION_AUTH_HEADER: &str = "x-baas-auth";
/// Response header carrying a session seed.
pub const SESSION_SEED_HEADER: &str = "x-baas-session-seed";

/// Inputs for an [`Authenticator`].
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub public_key: Option<String>,
    pub private_key: Option<String>,
    pub signing_mode: SigningMode,
    pub header_style: AuthHeaderStyle,
    /// Prefix of session store keys; empty means the bare public key.
    pub session_namespace: String,
    /// Identifies the service in log output.
    pub service_id: String,
}

/// Formats `at` as an HTTP-date (`Tue, 15 Nov 1994 08:12:31 GMT`).
#[must_use]
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}

/// Signs `(date, method, path)` with `key`.
#[must_use]
pub fn compute_signature(key: &str, date: &str, method: HttpMethod, path: &str) -> String {
    sha1_hex(&format!("{key}\n{date}\n{method}\n{path}"))
}

/// Derives the session private key from the static key and a server seed.
#[must_use]
pub fn derive_session_key(private_key: &str, seed: &str) -> String {
    sha1_hex(&format!("{private_key}\n{seed}"))
}

#[derive(Debug, Clone)]
struct Keys {
    public_key: String,
    private_key: String,
}

/// Signs outgoing requests for one service and records session seeds.
///
/// Without both keys the authenticator is disabled: it logs one warning on
/// construction and leaves every request untouched.
pub struct Authenticator {
    keys: Option<Keys>,
    signing_mode: SigningMode,
    header_style: AuthHeaderStyle,
    session_namespace: String,
    store: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("enabled", &self.keys.is_some())
            .field("signing_mode", &self.signing_mode)
            .field("header_style", &self.header_style)
            .field("session_namespace", &self.session_namespace)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    #[must_use]
    pub fn new(settings: AuthSettings, store: Arc<dyn SessionStore>) -> Self {
        let keys = match (settings.public_key, settings.private_key) {
            (Some(public_key), Some(private_key)) => Some(Keys {
                public_key,
                private_key,
            }),
            _ => {
                warn!(
                    service = %settings.service_id,
                    "no authentication keys configured, request signing disabled"
                );
                None
            }
        };
        Self {
            keys,
            signing_mode: settings.signing_mode,
            header_style: settings.header_style,
            session_namespace: settings.session_namespace,
            store,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.keys.is_some()
    }

    /// Signs a request for the current time. See [`Self::prepare_request_at`].
    pub fn prepare_request(&self, headers: &mut HeaderMap, method: HttpMethod, path: &str) {
        self.prepare_request_at(headers, method, path, Utc::now());
    }

    /// Sets `Date`, `Authorization` and, in session mode, `X-BAAS-AUTH`.
    ///
    /// Never fails: a header value that cannot be represented is skipped with
    /// a warning, and a missing session key signs with an empty key.
    pub fn prepare_request_at(
        &self,
        headers: &mut HeaderMap,
        method: HttpMethod,
        path: &str,
        at: DateTime<Utc>,
    ) {
        let Some(keys) = &self.keys else {
            return;
        };

        let date = http_date(at);
        let signature = compute_signature(&keys.private_key, &date, method, path);

        insert_header(headers, DATE, &date);
        insert_header(headers, AUTHORIZATION, &self.auth_header(&keys.public_key, &signature));

        if self.signing_mode == SigningMode::Session {
            let session_key = self.session_key(&keys.public_key).unwrap_or_default();
            let session_signature = compute_signature(&session_key, &date, method, path);
            insert_header(
                headers,
                HeaderName::from_static(SESSION_AUTH_HEADER),
                &self.auth_header(&keys.public_key, &session_signature),
            );
        }
    }

    /// Derives and persists the session key when `response_headers` carry a seed.
    ///
    /// No-op when signing is disabled or not in session mode.
    pub fn store_session_key(&self, response_headers: &HeaderMap) {
        let Some(keys) = &self.keys else {
            return;
        };
        if self.signing_mode != SigningMode::Session {
            return;
        }
        let Some(seed) = response_headers
            .get(SESSION_SEED_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return;
        };

        let session_key = derive_session_key(&keys.private_key, seed);
        let store_key = self.store_key(&keys.public_key);
        match self.store.set(&store_key, session_key.as_bytes()) {
            Ok(()) => debug!(key = %store_key, "stored session key"),
            Err(err) => warn!(key = %store_key, error = %err, "failed to store session key"),
        }
    }

    fn session_key(&self, public_key: &str) -> Option<String> {
        let store_key = self.store_key(public_key);
        match self.store.get(&store_key) {
            Ok(value) => value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                warn!(key = %store_key, error = %err, "failed to read session key");
                None
            }
        }
    }

    fn store_key(&self, public_key: &str) -> String {
        if self.session_namespace.is_empty() {
            public_key.to_string()
        } else {
            format!("{}.{public_key}", self.session_namespace)
        }
    }

    fn auth_header(&self, public_key: &str, signature: &str) -> String {
        match self.header_style {
            AuthHeaderStyle::Baas => format!("BAAS v1 apps/{public_key}:{signature}"),
            AuthHeaderStyle::Legacy => format!("{public_key}:{signature}"),
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, "header value is not representable, skipped"),
    }
}
