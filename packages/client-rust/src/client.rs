//! Operation dispatch.
//!
//! [`RemoteClient::invoke`] runs one operation end to end:
//!
//! 1. find the operation (joining the proxy definition first for proxy operations)
//! 2. translate top-level parameter names to schema names and escape keys
//! 3. substitute path placeholders and encode the body or query string
//! 4. sign, send, and record any session seed
//! 5. fail on a severe status, otherwise decode the body

use std::sync::{Arc, Weak};

use schemarpc_core::decode::messages_from_body;
use schemarpc_core::encode::escape_keys;
use schemarpc_core::{
    build_path, DecodedResponse, DecodedValue, Message, Operation, ParamMap, ResponseDecoder,
    ServiceDefinition,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::Authenticator;
use crate::directory::ServiceDirectory;
use crate::envelope::ResponseEnvelope;
use crate::error::RemoteError;
use crate::request::build_request;
use crate::transport::Transport;

/// Remote statuses treated as hard failures.
pub const SEVERE_STATUS_CODES: [u16; 3] = [500, 501, 503];

#[must_use]
pub fn is_severe_status(status: u16) -> bool {
    SEVERE_STATUS_CODES.contains(&status)
}

// ---------------------------------------------------------------------------
// Call arguments
// ---------------------------------------------------------------------------

/// One loosely typed call argument, identified by its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    /// Encode body parameters as JSON.
    Json(bool),
    /// Positional path parameters.
    Path(Vec<String>),
    /// Request parameters.
    Params(ParamMap),
}

impl From<bool> for CallArg {
    fn from(value: bool) -> Self {
        Self::Json(value)
    }
}

impl From<ParamMap> for CallArg {
    fn from(value: ParamMap) -> Self {
        Self::Params(value)
    }
}

impl From<Vec<String>> for CallArg {
    fn from(value: Vec<String>) -> Self {
        Self::Path(value)
    }
}

impl From<Vec<&str>> for CallArg {
    fn from(value: Vec<&str>) -> Self {
        Self::Path(value.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CallArg {
    fn from(value: [&str; N]) -> Self {
        Self::Path(value.into_iter().map(str::to_string).collect())
    }
}

/// Normalized arguments of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub encode_as_json: bool,
    pub path_params: Vec<String>,
    pub params: ParamMap,
}

impl CallArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn json(mut self, encode_as_json: bool) -> Self {
        self.encode_as_json = encode_as_json;
        self
    }

    #[must_use]
    pub fn path<I, S>(mut self, path_params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_params = path_params.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    /// Binds loosely ordered arguments by kind.
    ///
    /// Scanning from the last argument to the first, the first map, the first
    /// sequence and the first boolean found are taken; anything else is
    /// ignored. Missing kinds default to an empty map, an empty sequence and
    /// `false`.
    #[must_use]
    pub fn from_args(args: impl IntoIterator<Item = CallArg>) -> Self {
        let args: Vec<CallArg> = args.into_iter().collect();
        let mut json = None;
        let mut path = None;
        let mut params = None;
        for arg in args.into_iter().rev() {
            match arg {
                CallArg::Json(value) => {
                    json.get_or_insert(value);
                }
                CallArg::Path(value) => {
                    path.get_or_insert(value);
                }
                CallArg::Params(value) => {
                    params.get_or_insert(value);
                }
            }
        }
        Self {
            encode_as_json: json.unwrap_or_default(),
            path_params: path.unwrap_or_default(),
            params: params.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Which service version and operation produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseOrigin {
    pub service_code_name: String,
    pub service_version: String,
    pub operation_namespace: String,
    pub operation_code_name: String,
}

/// A decoded response with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub origin: ResponseOrigin,
    pub decoded: DecodedResponse,
}

impl RemoteResponse {
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.decoded.status_code
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.decoded.status.as_deref()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.decoded.messages
    }

    /// Attribute by display (long) name.
    #[must_use]
    pub fn get(&self, display_name: &str) -> Option<&DecodedValue> {
        self.decoded.get(display_name)
    }

    /// Attribute by schema (short) name.
    #[must_use]
    pub fn element(&self, schema_name: &str) -> Option<&DecodedValue> {
        self.decoded.element(schema_name)
    }

    #[must_use]
    pub fn to_envelope(&self) -> ResponseEnvelope {
        ResponseEnvelope {
            status_code: self.decoded.status_code,
            body: self.decoded.body.clone(),
            service_code_name: self.origin.service_code_name.clone(),
            service_version: self.origin.service_version.clone(),
            operation_namespace: self.origin.operation_namespace.clone(),
            operation_code_name: self.origin.operation_code_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteClient
// ---------------------------------------------------------------------------

/// Invokes the operations of one service version.
///
/// Obtained from [`ServiceDirectory::lookup`]. The client reads the current
/// definition from its directory on every call, so proxy joins made by any
/// client are visible to all of them.
pub struct RemoteClient {
    directory: Weak<ServiceDirectory>,
    code_name: String,
    version: String,
    api_url: Url,
    transport: Arc<dyn Transport>,
    authenticator: Arc<Authenticator>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("code_name", &self.code_name)
            .field("version", &self.version)
            .field("api_url", &self.api_url.as_str())
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    pub(crate) fn new(
        directory: Weak<ServiceDirectory>,
        code_name: &str,
        version: &str,
        api_url: Url,
        transport: Arc<dyn Transport>,
        authenticator: Arc<Authenticator>,
    ) -> Self {
        Self {
            directory,
            code_name: code_name.to_string(),
            version: version.to_string(),
            api_url,
            transport,
            authenticator,
        }
    }

    #[must_use]
    pub fn code_name(&self) -> &str {
        &self.code_name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Invokes `operation` with loosely ordered arguments.
    ///
    /// # Errors
    ///
    /// See [`Self::invoke`].
    pub async fn call<I>(&self, operation: &str, args: I) -> Result<RemoteResponse, RemoteError>
    where
        I: IntoIterator<Item = CallArg>,
    {
        self.invoke(operation, CallArgs::from_args(args)).await
    }

    /// Invokes `operation` by code name.
    ///
    /// # Errors
    ///
    /// - `UnknownOperation` when the definition has no such operation
    /// - `UnsupportedMethod` when the operation names an unknown HTTP method
    /// - `Encode` on path arity mismatches or files with a body-less method
    /// - `Connection` when the request cannot be delivered
    /// - `Severe` for statuses 500, 501 and 503
    /// - `Decode` when the body is not JSON or declares an unknown type
    pub async fn invoke(&self, operation: &str, args: CallArgs) -> Result<RemoteResponse, RemoteError> {
        let directory = self.directory.upgrade().ok_or(RemoteError::DirectoryClosed)?;
        let mut definition = directory.resolve(&self.code_name, Some(&self.version)).await?;

        if definition.find_operation(operation).is_none() {
            if let Some(proxy) = definition.find_proxy_operation(operation) {
                let remote = proxy
                    .service_name
                    .clone()
                    .unwrap_or_else(|| proxy.namespace.clone());
                definition = directory
                    .join_proxy(&self.code_name, &self.version, &remote)
                    .await?;
            }
        }

        let op = definition
            .find_operation(operation)
            .ok_or_else(|| RemoteError::UnknownOperation {
                code_name: self.code_name.clone(),
                operation: operation.to_string(),
            })?;
        self.make_request(&definition, op, args).await
    }

    async fn make_request(
        &self,
        definition: &ServiceDefinition,
        operation: &Operation,
        args: CallArgs,
    ) -> Result<RemoteResponse, RemoteError> {
        let method = operation.method()?;
        let params = escape_keys(definition.glossary.apply_to_params(args.params));
        let path = build_path(&operation.path, &args.path_params)?;

        let mut request = build_request(&self.api_url, method, &path, &params, args.encode_as_json)?;
        self.authenticator
            .prepare_request(&mut request.headers, method, request.url.path());

        let target = request.url.to_string();
        info!(
            service = %self.code_name,
            operation = %operation.code_name,
            %method,
            path = request.url.path(),
            "dispatching operation"
        );

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|source| RemoteError::Connection {
                url: target,
                source,
            })?;
        self.authenticator.store_session_key(&response.headers);
        debug!(operation = %operation.code_name, status = response.status, "received response");

        if is_severe_status(response.status) {
            let messages = messages_from_body(&response.body);
            warn!(
                operation = %operation.code_name,
                status = response.status,
                messages = messages.len(),
                "severe remote error"
            );
            return Err(RemoteError::Severe {
                status: response.status,
                messages,
            });
        }

        let decoded = ResponseDecoder::for_definition(definition).decode_slice(
            response.status,
            &response.body,
            operation,
        )?;
        Ok(RemoteResponse {
            origin: ResponseOrigin {
                service_code_name: self.code_name.clone(),
                service_version: self.version.clone(),
                operation_namespace: operation.namespace.clone(),
                operation_code_name: operation.code_name.clone(),
            },
            decoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use http::header::{AUTHORIZATION, DATE};
    use schemarpc_core::{params, EncodeError, HttpMethod};

    use super::*;
    use crate::auth::compute_signature;
    use crate::testing::{vpos_directory, vpos_transport, PRIVATE_KEY};
    use crate::transport::RequestBody;

    // ---- argument normalization ----

    #[test]
    fn from_args_binds_by_kind_from_the_end() {
        let args = CallArgs::from_args([
            CallArg::from(params! { "a" => 1 }),
            CallArg::from(true),
            CallArg::from(vec!["1"]),
            CallArg::from(params! { "b" => 2 }),
        ]);
        assert!(args.encode_as_json);
        assert_eq!(args.path_params, vec!["1".to_string()]);
        assert_eq!(args.params, params! { "b" => 2 });
    }

    #[test]
    fn from_args_defaults() {
        assert_eq!(CallArgs::from_args(Vec::new()), CallArgs::default());
        let only_path = CallArgs::from_args([CallArg::from(["x", "y"])]);
        assert_eq!(only_path.path_params, vec!["x".to_string(), "y".to_string()]);
        assert!(!only_path.encode_as_json);
        assert!(only_path.params.is_empty());
    }

    #[test]
    fn builder_matches_from_args() {
        let built = CallArgs::new().json(true).path(["7"]).params(params! { "q" => "x" });
        let scanned = CallArgs::from_args([
            CallArg::from(["7"]),
            CallArg::from(params! { "q" => "x" }),
            CallArg::from(true),
        ]);
        assert_eq!(built, scanned);
    }

    #[test]
    fn severe_statuses() {
        for status in [500, 501, 503] {
            assert!(is_severe_status(status), "{status}");
        }
        for status in [200, 201, 404, 422, 502] {
            assert!(!is_severe_status(status), "{status}");
        }
    }

    // ---- dispatch ----

    #[tokio::test]
    async fn invokes_and_decodes() {
        let transport = vpos_transport();
        let directory = vpos_directory(transport.clone());
        let client = directory.lookup("vpos", None).await.unwrap();

        let response = client
            .invoke("get_user", CallArgs::new().path(["42"]))
            .await
            .unwrap();

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.status(), Some("ok"));
        let user = response.get("user").unwrap().as_record().unwrap();
        assert_eq!(user.get("email").unwrap().as_str(), Some("x@y.com"));
        assert_eq!(user.get("address").unwrap().as_str(), Some("Main St"));
        assert_eq!(user.element("ad").unwrap().as_str(), Some("Main St"));
        assert_eq!(response.get("nickname").unwrap().as_str(), Some("anon"));
        assert_eq!(response.origin.operation_namespace, "users");
    }

    #[tokio::test]
    async fn signs_the_full_request_path() {
        let transport = vpos_transport();
        let directory = vpos_directory(transport.clone());
        let client = directory.lookup("vpos", None).await.unwrap();
        client
            .invoke("get_user", CallArgs::new().path(["42"]).params(params! { "x" => 1 }))
            .await
            .unwrap();

        let request = transport.last().unwrap();
        assert_eq!(request.url.path(), "/vpos/api/0.1/users/42");
        assert_eq!(request.url.query(), Some("x=1"));

        let date = request.headers.get(DATE).unwrap().to_str().unwrap();
        let expected = compute_signature(PRIVATE_KEY, date, HttpMethod::Get, "/vpos/api/0.1/users/42");
        assert_eq!(
            request.headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            format!("BAAS v1 apps/1234567:{expected}")
        );
    }

    #[tokio::test]
    async fn translates_and_escapes_parameter_names() {
        let transport = vpos_transport();
        let directory = vpos_directory(transport.clone());
        let client = directory.lookup("vpos", None).await.unwrap();

        let response = client
            .invoke(
                "create_user",
                CallArgs::new().params(params! {
                    "full_name" => "Bob Smith",
                    "address" => "1 Main",
                    "odd key" => "v",
                }),
            )
            .await
            .unwrap();
        assert_eq!(response.get("user_id").unwrap().as_i64(), Some(7));

        let request = transport.last().unwrap();
        assert_eq!(
            request.body,
            RequestBody::Form("fn=Bob%20Smith&ad=1%20Main&odd%20key=v".into())
        );
    }

    #[tokio::test]
    async fn json_flag_sends_json_body() {
        let transport = vpos_transport();
        let directory = vpos_directory(transport.clone());
        let client = directory.lookup("vpos", None).await.unwrap();

        client
            .call(
                "create_user",
                [CallArg::from(true), CallArg::from(params! { "full_name" => "Bob" })],
            )
            .await
            .unwrap();
        assert_eq!(
            transport.last().unwrap().body,
            RequestBody::Json(r#"{"fn":"Bob"}"#.into())
        );
    }

    #[tokio::test]
    async fn path_arity_is_checked_before_sending() {
        let transport = vpos_transport();
        let directory = vpos_directory(transport.clone());
        let client = directory.lookup("vpos", None).await.unwrap();
        let sent = transport.request_count();

        let err = client.invoke("get_user", CallArgs::new()).await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Encode(EncodeError::PathArity { given: 0, expected: 1 })
        ));
        assert_eq!(transport.request_count(), sent);
    }

    #[tokio::test]
    async fn severe_status_carries_messages() {
        let directory = vpos_directory(vpos_transport());
        let client = directory.lookup("vpos", None).await.unwrap();

        let err = client
            .invoke("get_user", CallArgs::new().path(["500"]))
            .await
            .unwrap_err();
        let RemoteError::Severe { status, messages } = &err else {
            panic!("expected a severe error, got {err:?}");
        };
        assert_eq!(*status, 500);
        assert_eq!(messages[0].key.as_deref(), Some("Boom"));
        assert_eq!(messages[0].description.as_deref(), Some("exploded"));
        assert_eq!(err.messages().len(), 1);
    }

    #[tokio::test]
    async fn severe_status_with_non_json_body_has_no_messages() {
        let directory = vpos_directory(vpos_transport());
        let client = directory.lookup("vpos", None).await.unwrap();
        let err = client
            .invoke("get_user", CallArgs::new().path(["503"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Severe { status: 503, ref messages } if messages.is_empty()));
    }

    #[tokio::test]
    async fn non_severe_error_status_is_decoded() {
        let directory = vpos_directory(vpos_transport());
        let client = directory.lookup("vpos", None).await.unwrap();
        let response = client
            .invoke("get_user", CallArgs::new().path(["404"]))
            .await
            .unwrap();
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.status(), Some("error"));
        assert_eq!(response.messages()[0].key.as_deref(), Some("UserNotFound"));
        assert!(response.get("user").is_none());
    }

    #[tokio::test]
    async fn connection_failure_names_the_url() {
        let directory = vpos_directory(vpos_transport());
        let client = directory.lookup("vpos", None).await.unwrap();
        let err = client
            .invoke("get_user", CallArgs::new().path(["down"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Connection { ref url, .. } if url == "http://api.test/vpos/api/0.1/users/down"
        ));
    }

    #[tokio::test]
    async fn proxy_operation_joins_then_dispatches() {
        let transport = vpos_transport();
        let directory = vpos_directory(transport.clone());
        let client = directory.lookup("vpos", None).await.unwrap();

        let response = client
            .invoke("get_avatar", CallArgs::new().path(["7"]))
            .await
            .unwrap();
        let avatar = response.get("avatar").unwrap().as_record().unwrap();
        assert_eq!(avatar.get("url").unwrap().as_str(), Some("http://img/7.png"));
        assert_eq!(response.origin.operation_namespace, "media");

        client
            .invoke("get_avatar", CallArgs::new().path(["7"]))
            .await
            .unwrap();
        assert_eq!(transport.hits("/vpos/doc/0.1/proxy/media"), 1);
        assert_eq!(transport.hits("/vpos/api/0.1/avatars/7"), 2);
    }

    #[tokio::test]
    async fn unknown_operation() {
        let directory = vpos_directory(vpos_transport());
        let client = directory.lookup("vpos", None).await.unwrap();
        let err = client.invoke("nope", CallArgs::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::UnknownOperation { ref operation, .. } if operation == "nope"));
    }

    #[tokio::test]
    async fn unsupported_method() {
        let directory = vpos_directory(vpos_transport());
        let client = directory.lookup("vpos", None).await.unwrap();
        let err = client
            .invoke("patch_user", CallArgs::new().path(["42"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedMethod(_)));
    }

    #[tokio::test]
    async fn dropped_directory_closes_clients() {
        let directory = vpos_directory(vpos_transport());
        let client = directory.lookup("vpos", None).await.unwrap();
        drop(directory);
        let err = client
            .invoke("get_user", CallArgs::new().path(["42"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::DirectoryClosed));
    }
}
